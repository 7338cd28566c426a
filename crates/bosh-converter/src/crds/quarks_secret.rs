//! `QuarksSecret` Custom Resource Definition for generated deployment variables

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Request to generate a secret (password, key pair or certificate).
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "quarks.cloudfoundry.org", version = "v1alpha1", kind = "QuarksSecret")]
#[kube(namespaced)]
#[kube(shortname = "qsec")]
#[serde(rename_all = "camelCase")]
pub struct QuarksSecretSpec {
    #[serde(rename = "type")]
    pub secret_type: SecretType,

    /// Name of the generated `Secret`
    pub secret_name: String,

    #[serde(default)]
    pub request: Request,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecretType {
    Password,
    Certificate,
    Ssh,
    Rsa,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateRequest>,
}

/// Parameters of a certificate to generate
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
pub struct CertificateRequest {
    #[serde(rename = "commonName", default)]
    pub common_name: String,

    #[serde(rename = "alternativeNames", default)]
    pub alternative_names: Vec<String>,

    #[serde(rename = "isCA", default)]
    pub is_ca: bool,

    #[serde(rename = "CARef", default, skip_serializing_if = "Option::is_none")]
    pub ca_ref: Option<SecretReference>,

    #[serde(rename = "CAKeyRef", default, skip_serializing_if = "Option::is_none")]
    pub ca_key_ref: Option<SecretReference>,

    #[serde(rename = "signerType", default = "default_signer_type")]
    pub signer_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
}

/// A key within a secret
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub key: String,
}

/// Certificates are signed by the operator rather than the cluster CA
pub const SIGNER_TYPE_LOCAL: &str = "local";

fn default_signer_type() -> String {
    SIGNER_TYPE_LOCAL.to_string()
}
