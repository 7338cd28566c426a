//! Variables converter
//!
//! Turns the `variables` section of a manifest into `QuarksSecret` requests.

use crate::crds::{
    CertificateRequest, QuarksSecret, QuarksSecretSpec, Request, SecretReference, SecretType,
    SIGNER_TYPE_LOCAL,
};
use crate::error::{Error, Result};
use crate::labels;
use crate::manifest::{Variable, VariableType};
use crate::names::{self, DeploymentSecretType};
use tracing::debug;

/// Key of the certificate in a generated certificate secret
pub const CERTIFICATE_KEY: &str = "certificate";
/// Key of the private key in a generated certificate secret
pub const PRIVATE_KEY_KEY: &str = "private_key";

/// One `QuarksSecret` per manifest variable.
pub fn variables_to_quarks_secrets(
    manifest_name: &str,
    namespace: &str,
    variables: &[Variable],
) -> Result<Vec<QuarksSecret>> {
    let secrets = variables
        .iter()
        .map(|variable| variable_to_quarks_secret(manifest_name, namespace, variable))
        .collect::<Result<Vec<_>>>()?;

    debug!(manifest = %manifest_name, secrets = secrets.len(), "converted variables");
    Ok(secrets)
}

fn variable_to_quarks_secret(
    manifest_name: &str,
    namespace: &str,
    variable: &Variable,
) -> Result<QuarksSecret> {
    let secret_name = names::deployment_secret_name(
        DeploymentSecretType::Variable,
        manifest_name,
        Some(&variable.name),
    );

    let (secret_type, request) = match variable.variable_type {
        VariableType::Password => (SecretType::Password, Request::default()),
        VariableType::Ssh => (SecretType::Ssh, Request::default()),
        VariableType::Rsa => (SecretType::Rsa, Request::default()),
        VariableType::Certificate => (
            SecretType::Certificate,
            Request {
                certificate: Some(certificate_request(manifest_name, variable)?),
            },
        ),
    };

    let mut secret = QuarksSecret::new(
        &secret_name,
        QuarksSecretSpec {
            secret_type,
            secret_name: secret_name.clone(),
            request,
        },
    );
    secret.metadata.namespace = Some(namespace.to_string());
    secret.metadata.labels = Some(labels::deployment_labels(manifest_name));
    Ok(secret)
}

fn certificate_request(manifest_name: &str, variable: &Variable) -> Result<CertificateRequest> {
    let options = variable.options.as_ref().ok_or_else(|| Error::InvalidVariable {
        name: variable.name.clone(),
        reason: "certificate variables require options".to_string(),
    })?;

    let ca_secret = options.ca.as_deref().map(|ca| {
        names::deployment_secret_name(DeploymentSecretType::Variable, manifest_name, Some(ca))
    });

    Ok(CertificateRequest {
        common_name: options.common_name.clone().unwrap_or_default(),
        alternative_names: options.alternative_names.clone(),
        is_ca: options.is_ca,
        ca_ref: ca_secret.clone().map(|name| SecretReference {
            name,
            key: CERTIFICATE_KEY.to_string(),
        }),
        ca_key_ref: ca_secret.map(|name| SecretReference {
            name,
            key: PRIVATE_KEY_KEY.to_string(),
        }),
        signer_type: SIGNER_TYPE_LOCAL.to_string(),
        usages: options
            .extended_key_usage
            .iter()
            .map(|usage| key_usage(usage))
            .collect(),
    })
}

/// BOSH extended key usages (`server_auth`) to certificate usages (`server auth`)
fn key_usage(usage: &str) -> String {
    usage.replace('_', " ")
}
