//! # Deployment Stack
//!
//! Declarative description of the AWS resources that host the assistant:
//! a Fargate service behind an internet-facing network load balancer, a
//! Cognito user/identity pool for the frontend, and a private S3 bucket
//! served through CloudFront.
//!
//! The stack is rendered as a CloudFormation template (see `template`);
//! nothing here talks to AWS.
//!
//! ## Context file (TOML):
//! ```toml
//! certificate_arn = "arn:aws:acm:..."   # optional; enables TLS on 443
//!
//! [vpc_config]
//! vpc_id = "vpc-0123"
//! cidr = "10.0.0.0/16"
//! availability_zones = ["us-east-1a", "us-east-1b"]
//! public_subnet_ids = ["subnet-a", "subnet-b"]
//! private_subnet_ids = ["subnet-c", "subnet-d"]
//! ```

pub mod template;

pub use template::synthesize;

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_STACK_NAME: &str = "VirtualBankingAssistantCdkStack";
pub const DEFAULT_DESCRIPTION: &str = "Virtual Banking Assistant (uksb-ybsvnefrsb)";
pub const CONTAINER_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("Failed to read context file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid context file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Expected exactly 2 {kind} subnet ids, got {count}")]
    SubnetCount { kind: &'static str, count: usize },

    #[error("Missing required value: {0}")]
    Missing(&'static str),
}

/// Existing VPC the stack deploys into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcConfig {
    pub vpc_id: String,
    /// Only this range may reach the container port
    pub cidr: String,
    pub availability_zones: Vec<String>,
    /// Load balancer subnets
    pub public_subnet_ids: Vec<String>,
    /// Task subnets
    pub private_subnet_ids: Vec<String>,
}

/// Contents of the context file.
#[derive(Debug, Clone, Deserialize)]
pub struct StackContext {
    pub vpc_config: VpcConfig,
    #[serde(default)]
    pub certificate_arn: Option<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub model_region: Option<String>,
}

/// Everything `synthesize` needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackProps {
    pub stack_name: String,
    pub description: String,
    /// Deployment target, from `CDK_DEFAULT_ACCOUNT` / `CDK_DEFAULT_REGION`
    pub account: Option<String>,
    pub region: Option<String>,
    pub vpc: VpcConfig,
    pub certificate_arn: Option<String>,
    /// Image URI for the backend container
    pub container_image: String,
    /// Region hosting the speech model the task may invoke
    pub model_region: String,
    pub model_id: String,
}

impl StackProps {
    /// Load the context file and merge the CDK environment variables.
    pub fn load(path: &Path) -> Result<Self, InfraError> {
        let text = std::fs::read_to_string(path).map_err(|source| InfraError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text, |key| env::var(key).ok())
    }

    pub fn from_toml<F>(text: &str, lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let context: StackContext = toml::from_str(text)?;
        let props = Self::from_context(context, lookup);
        props.validate()?;
        Ok(props)
    }

    pub fn from_context<F>(context: StackContext, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            account: non_empty(lookup("CDK_DEFAULT_ACCOUNT")),
            region: non_empty(lookup("CDK_DEFAULT_REGION")),
            vpc: context.vpc_config,
            certificate_arn: non_empty(context.certificate_arn),
            container_image: non_empty(context.container_image)
                .unwrap_or_else(|| "virtual-banking-assistant:latest".to_string()),
            model_region: non_empty(context.model_region).unwrap_or_else(|| "us-east-1".to_string()),
            model_id: "amazon.nova-sonic-v1:0".to_string(),
        }
    }

    /// The service and load balancer each span exactly two subnets.
    pub fn validate(&self) -> Result<(), InfraError> {
        if self.vpc.vpc_id.trim().is_empty() {
            return Err(InfraError::Missing("vpc_config.vpc_id"));
        }
        if self.vpc.cidr.trim().is_empty() {
            return Err(InfraError::Missing("vpc_config.cidr"));
        }

        let subnets = [
            ("public", &self.vpc.public_subnet_ids),
            ("private", &self.vpc.private_subnet_ids),
        ];
        for (kind, ids) in subnets {
            if ids.len() != 2 {
                return Err(InfraError::SubnetCount {
                    kind,
                    count: ids.len(),
                });
            }
        }

        Ok(())
    }

    /// ARN of the foundation model the task role may invoke.
    pub fn model_arn(&self) -> String {
        format!(
            "arn:aws:bedrock:{}::foundation-model/{}",
            self.model_region, self.model_id
        )
    }

    pub fn uses_tls(&self) -> bool {
        self.certificate_arn.is_some()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const CONTEXT: &str = r#"
[vpc_config]
vpc_id = "vpc-0123"
cidr = "10.0.0.0/16"
availability_zones = ["us-east-1a", "us-east-1b"]
public_subnet_ids = ["subnet-pub-a", "subnet-pub-b"]
private_subnet_ids = ["subnet-priv-a", "subnet-priv-b"]
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_load_context() {
        let props = StackProps::from_toml(CONTEXT, no_env).unwrap();
        assert_eq!(props.vpc.vpc_id, "vpc-0123");
        assert_eq!(props.vpc.private_subnet_ids, ["subnet-priv-a", "subnet-priv-b"]);
        assert_eq!(props.certificate_arn, None);
        assert!(!props.uses_tls());
        assert_eq!(
            props.model_arn(),
            "arn:aws:bedrock:us-east-1::foundation-model/amazon.nova-sonic-v1:0"
        );
    }

    #[test]
    fn test_environment_sets_account_and_region() {
        let lookup = |key: &str| match key {
            "CDK_DEFAULT_ACCOUNT" => Some("123456789012".to_string()),
            "CDK_DEFAULT_REGION" => Some("us-west-2".to_string()),
            _ => None,
        };
        let text = format!("certificate_arn = \"arn:aws:acm:cert\"\n{}", CONTEXT);
        let props = StackProps::from_toml(&text, lookup).unwrap();
        assert_eq!(props.account.as_deref(), Some("123456789012"));
        assert_eq!(props.region.as_deref(), Some("us-west-2"));
        assert!(props.uses_tls());
    }

    #[test]
    fn test_requires_two_subnets_each() {
        let text = CONTEXT.replace(
            r#"public_subnet_ids = ["subnet-pub-a", "subnet-pub-b"]"#,
            r#"public_subnet_ids = ["subnet-pub-a"]"#,
        );
        let err = StackProps::from_toml(&text, no_env).unwrap_err();
        assert!(matches!(err, InfraError::SubnetCount { kind: "public", count: 1 }));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            StackProps::from_toml("vpc_config = 3", no_env),
            Err(InfraError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", CONTEXT).unwrap();
        let props = StackProps::load(file.path()).unwrap();
        assert_eq!(props.stack_name, DEFAULT_STACK_NAME);

        let missing = StackProps::load(Path::new("/nonexistent/stack.toml"));
        assert!(matches!(missing, Err(InfraError::Io { .. })));
    }
}
