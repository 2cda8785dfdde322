//! # CRD Generator
//!
//! Generates the Kubernetes CustomResourceDefinition YAML for `Certificate`.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/certificate.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```
//!
//! The generated CRD includes the OpenAPI schema with the `validForDays` and
//! `renewBeforeDays` minimums, their defaults, and the status subresource.

use certificate_manager::crd::Certificate;
use kube::core::CustomResourceExt;

fn main() {
    let crd = Certificate::crd();

    match serde_yaml::to_string(&crd) {
        Ok(yaml) => {
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
