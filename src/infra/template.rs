//! CloudFormation rendering of `StackProps`.

use super::{StackProps, CONTAINER_PORT};
use serde_json::{json, Map, Value};

const CLUSTER: &str = "VirtualBankingAssistantCluster";
const LOG_GROUP: &str = "VirtualBankingAssistantLogGroup";
const TASK_ROLE: &str = "VirtualBankingAssistantTaskRole";
const SECURITY_GROUP: &str = "VirtualBankingAssistantServiceSG";
const TASK_DEFINITION: &str = "VirtualBankingAssistantTaskDef";
const CONTAINER: &str = "VirtualBankingAssistantContainer";
const SERVICE: &str = "VirtualBankingAssistantFargateService";
const NLB: &str = "VirtualBankingAssistantNLB";
const TARGET_GROUP: &str = "VirtualBankingAssistantTargetGroup";
const LISTENER: &str = "VirtualBankingAssistantHttpListener";
const USER_POOL: &str = "VirtualBankingAssistantUserpool";
const USER_POOL_CLIENT: &str = "VirtualBankingAssistantUserpoolClient";
const IDENTITY_POOL: &str = "VirtualBankingAssistantIdentityPool";
const AUTHENTICATED_ROLE: &str = "VirtualBankingAssistantAuthenticatedRole";
const ROLE_ATTACHMENT: &str = "VirtualBankingAssistantRoleAttachment";
const BUCKET: &str = "VirtualBankingAssistantBucket";
const BUCKET_POLICY: &str = "VirtualBankingAssistantBucketPolicy";
const ORIGIN_ACCESS_CONTROL: &str = "VirtualBankingAssistantOAC";
const DISTRIBUTION: &str = "VirtualBankingAssistantDistribution";

/// Managed `CachingOptimized` cache policy.
const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";
const LOG_STREAM_PREFIX: &str = "VirtualBankingAssistant";

fn reference(id: &str) -> Value {
    json!({ "Ref": id })
}

fn get_att(id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attribute] })
}

fn attributes<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// The resource goes away with the stack.
fn destroy_on_delete() -> Map<String, Value> {
    attributes([
        ("DeletionPolicy", json!("Delete")),
        ("UpdateReplacePolicy", json!("Delete")),
    ])
}

fn https_url(host: Value) -> Value {
    json!({ "Fn::Join": ["", ["https://", host]] })
}

#[derive(Default)]
struct Template {
    resources: Map<String, Value>,
    outputs: Map<String, Value>,
}

impl Template {
    fn resource(&mut self, id: &str, kind: &str, properties: Value) {
        self.resource_with(id, kind, properties, Map::new());
    }

    /// Like `resource`, with extra top-level attributes such as `DependsOn`.
    fn resource_with(
        &mut self,
        id: &str,
        kind: &str,
        properties: Value,
        mut attributes: Map<String, Value>,
    ) {
        attributes.insert("Type".to_string(), json!(kind));
        attributes.insert("Properties".to_string(), properties);
        self.resources.insert(id.to_string(), Value::Object(attributes));
    }

    fn output(&mut self, id: &str, value: Value) {
        self.outputs.insert(id.to_string(), json!({ "Value": value }));
    }
}

/// Render the whole stack.
pub fn synthesize(props: &StackProps) -> Value {
    let mut template = Template::default();

    compute(&mut template, props);
    load_balancer(&mut template, props);
    auth(&mut template);
    frontend(&mut template);

    template.output("UserPoolId", reference(USER_POOL));
    template.output("UserPoolClientId", reference(USER_POOL_CLIENT));
    template.output("IdentityPoolId", reference(IDENTITY_POOL));
    template.output("CloudFrontURL", https_url(get_att(DISTRIBUTION, "DomainName")));
    template.output("NLBEndpoint", https_url(get_att(NLB, "DNSName")));
    template.output("FrontendBucket", reference(BUCKET));

    let mut root = json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Description": props.description,
        "Resources": template.resources,
        "Outputs": template.outputs,
    });
    if props.account.is_some() || props.region.is_some() {
        root["Metadata"] = json!({
            "StackName": props.stack_name,
            "Environment": { "Account": props.account, "Region": props.region }
        });
    }
    root
}

/// Cluster, task role, security group, task definition and service.
fn compute(template: &mut Template, props: &StackProps) {
    template.resource(CLUSTER, "AWS::ECS::Cluster", json!({}));
    template.resource(LOG_GROUP, "AWS::Logs::LogGroup", json!({}));

    template.resource(
        TASK_ROLE,
        "AWS::IAM::Role",
        json!({
            "Description": "Role for Voice ECS Task",
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": "ecs-tasks.amazonaws.com" },
                    "Action": "sts:AssumeRole"
                }]
            },
            "ManagedPolicyArns": [{
                "Fn::Join": ["", [
                    "arn:", { "Ref": "AWS::Partition" },
                    ":iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy"
                ]]
            }],
            "Policies": [{
                "PolicyName": "BedrockInvokeModel",
                "PolicyDocument": {
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": ["bedrock:InvokeModel"],
                        "Resource": [props.model_arn()]
                    }]
                }
            }]
        }),
    );

    template.resource(
        SECURITY_GROUP,
        "AWS::EC2::SecurityGroup",
        json!({
            "GroupDescription": "Security group for the voice service",
            "VpcId": props.vpc.vpc_id,
            "SecurityGroupIngress": [{
                "IpProtocol": "tcp",
                "FromPort": CONTAINER_PORT,
                "ToPort": CONTAINER_PORT,
                "CidrIp": props.vpc.cidr,
                "Description": "Allow inbound HTTP traffic from VPC only"
            }],
            "SecurityGroupEgress": [{
                "IpProtocol": "-1",
                "CidrIp": "0.0.0.0/0",
                "Description": "Allow all outbound traffic by default"
            }]
        }),
    );

    template.resource(
        TASK_DEFINITION,
        "AWS::ECS::TaskDefinition",
        json!({
            "RequiresCompatibilities": ["FARGATE"],
            "NetworkMode": "awsvpc",
            "Cpu": "2048",
            "Memory": "4096",
            "TaskRoleArn": get_att(TASK_ROLE, "Arn"),
            "ExecutionRoleArn": get_att(TASK_ROLE, "Arn"),
            "ContainerDefinitions": [{
                "Name": CONTAINER,
                "Image": props.container_image,
                "Essential": true,
                "PortMappings": [{ "ContainerPort": CONTAINER_PORT, "Protocol": "tcp" }],
                "LogConfiguration": {
                    "LogDriver": "awslogs",
                    "Options": {
                        "awslogs-group": reference(LOG_GROUP),
                        "awslogs-stream-prefix": LOG_STREAM_PREFIX,
                        "awslogs-region": reference("AWS::Region")
                    }
                }
            }]
        }),
    );

    template.resource_with(
        SERVICE,
        "AWS::ECS::Service",
        json!({
            "Cluster": reference(CLUSTER),
            "TaskDefinition": reference(TASK_DEFINITION),
            "LaunchType": "FARGATE",
            "DesiredCount": 1,
            "EnableExecuteCommand": true,
            "DeploymentConfiguration": {
                "DeploymentCircuitBreaker": { "Enable": true, "Rollback": true }
            },
            "NetworkConfiguration": {
                "AwsvpcConfiguration": {
                    "AssignPublicIp": "DISABLED",
                    "SecurityGroups": [get_att(SECURITY_GROUP, "GroupId")],
                    "Subnets": props.vpc.private_subnet_ids
                }
            },
            "LoadBalancers": [{
                "ContainerName": CONTAINER,
                "ContainerPort": CONTAINER_PORT,
                "TargetGroupArn": reference(TARGET_GROUP)
            }]
        }),
        attributes([("DependsOn", json!([LISTENER]))]),
    );
}

/// Network load balancer, target group and listener.
fn load_balancer(template: &mut Template, props: &StackProps) {
    template.resource(
        NLB,
        "AWS::ElasticLoadBalancingV2::LoadBalancer",
        json!({
            "Type": "network",
            "Scheme": "internet-facing",
            "Subnets": props.vpc.public_subnet_ids,
            "LoadBalancerAttributes": [
                { "Key": "load_balancing.cross_zone.enabled", "Value": "true" }
            ]
        }),
    );

    template.resource(
        TARGET_GROUP,
        "AWS::ElasticLoadBalancingV2::TargetGroup",
        json!({
            "VpcId": props.vpc.vpc_id,
            "Port": CONTAINER_PORT,
            "Protocol": "TCP",
            "TargetType": "ip",
            "HealthCheckProtocol": "HTTP",
            "HealthCheckPath": "/health",
            "HealthyThresholdCount": 2,
            "UnhealthyThresholdCount": 3,
            "HealthCheckIntervalSeconds": 30,
            "HealthCheckTimeoutSeconds": 10,
            "Matcher": { "HttpCode": "200-399" },
            "TargetGroupAttributes": [
                { "Key": "deregistration_delay.timeout_seconds", "Value": "120" }
            ]
        }),
    );

    let mut listener = json!({
        "LoadBalancerArn": reference(NLB),
        "DefaultActions": [{ "Type": "forward", "TargetGroupArn": reference(TARGET_GROUP) }]
    });
    match &props.certificate_arn {
        Some(arn) => {
            listener["Port"] = json!(443);
            listener["Protocol"] = json!("TLS");
            listener["Certificates"] = json!([{ "CertificateArn": arn }]);
        }
        None => {
            listener["Port"] = json!(80);
            listener["Protocol"] = json!("TCP");
        }
    }
    template.resource(LISTENER, "AWS::ElasticLoadBalancingV2::Listener", listener);
}

/// Cognito user pool, app client, identity pool and the authenticated role.
fn auth(template: &mut Template) {
    template.resource_with(
        USER_POOL,
        "AWS::Cognito::UserPool",
        json!({
            "AdminCreateUserConfig": { "AllowAdminCreateUserOnly": true },
            "AccountRecoverySetting": {
                "RecoveryMechanisms": [{ "Name": "verified_email", "Priority": 1 }]
            },
            "MfaConfiguration": "OFF",
            "AutoVerifiedAttributes": ["email"],
            "Policies": {
                "PasswordPolicy": {
                    "MinimumLength": 8,
                    "RequireLowercase": true,
                    "RequireNumbers": true,
                    "RequireSymbols": true,
                    "RequireUppercase": true
                }
            },
            "Schema": [{ "Name": "email", "Required": true, "Mutable": false }]
        }),
        destroy_on_delete(),
    );

    template.resource(
        USER_POOL_CLIENT,
        "AWS::Cognito::UserPoolClient",
        json!({
            "UserPoolId": reference(USER_POOL),
            "ExplicitAuthFlows": ["ALLOW_USER_SRP_AUTH", "ALLOW_REFRESH_TOKEN_AUTH"],
            "AllowedOAuthFlowsUserPoolClient": false,
            "PreventUserExistenceErrors": "ENABLED",
            "SupportedIdentityProviders": []
        }),
    );

    template.resource(
        IDENTITY_POOL,
        "AWS::Cognito::IdentityPool",
        json!({
            "AllowUnauthenticatedIdentities": false,
            "AllowClassicFlow": false,
            "CognitoIdentityProviders": [{
                "ClientId": reference(USER_POOL_CLIENT),
                "ProviderName": get_att(USER_POOL, "ProviderName")
            }]
        }),
    );

    template.resource(
        AUTHENTICATED_ROLE,
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Federated": "cognito-identity.amazonaws.com" },
                    "Action": "sts:AssumeRoleWithWebIdentity",
                    "Condition": {
                        "StringEquals": {
                            "cognito-identity.amazonaws.com:aud": reference(IDENTITY_POOL)
                        },
                        "ForAnyValue:StringLike": {
                            "cognito-identity.amazonaws.com:amr": "authenticated"
                        }
                    }
                }]
            }
        }),
    );

    template.resource(
        ROLE_ATTACHMENT,
        "AWS::Cognito::IdentityPoolRoleAttachment",
        json!({
            "IdentityPoolId": reference(IDENTITY_POOL),
            "Roles": { "authenticated": get_att(AUTHENTICATED_ROLE, "Arn") }
        }),
    );
}

/// Private bucket served through CloudFront with origin access control.
fn frontend(template: &mut Template) {
    template.resource_with(
        BUCKET,
        "AWS::S3::Bucket",
        json!({
            "AccessControl": "Private",
            "PublicAccessBlockConfiguration": {
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true
            }
        }),
        destroy_on_delete(),
    );

    let bucket_arn = get_att(BUCKET, "Arn");
    let objects_arn = json!({ "Fn::Join": ["", [bucket_arn.clone(), "/*"]] });
    let distribution_arn = json!({
        "Fn::Join": ["", [
            "arn:", { "Ref": "AWS::Partition" }, ":cloudfront::", { "Ref": "AWS::AccountId" },
            ":distribution/", reference(DISTRIBUTION)
        ]]
    });

    template.resource(
        BUCKET_POLICY,
        "AWS::S3::BucketPolicy",
        json!({
            "Bucket": reference(BUCKET),
            "PolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [
                    {
                        "Effect": "Deny",
                        "Principal": { "AWS": "*" },
                        "Action": "s3:*",
                        "Resource": [bucket_arn, objects_arn.clone()],
                        "Condition": { "Bool": { "aws:SecureTransport": "false" } }
                    },
                    {
                        "Effect": "Allow",
                        "Principal": { "Service": "cloudfront.amazonaws.com" },
                        "Action": "s3:GetObject",
                        "Resource": objects_arn,
                        "Condition": { "StringEquals": { "AWS:SourceArn": distribution_arn } }
                    }
                ]
            }
        }),
    );

    template.resource(
        ORIGIN_ACCESS_CONTROL,
        "AWS::CloudFront::OriginAccessControl",
        json!({
            "OriginAccessControlConfig": {
                "Name": ORIGIN_ACCESS_CONTROL,
                "OriginAccessControlOriginType": "s3",
                "SigningBehavior": "always",
                "SigningProtocol": "sigv4"
            }
        }),
    );

    let origin_id = "FrontendOrigin";
    let spa_fallback = |code: u16| {
        json!({ "ErrorCode": code, "ResponseCode": 200, "ResponsePagePath": "/index.html" })
    };

    template.resource(
        DISTRIBUTION,
        "AWS::CloudFront::Distribution",
        json!({
            "DistributionConfig": {
                "Enabled": true,
                "Comment": "Virtual Banking Assistant Frontend",
                "DefaultRootObject": "index.html",
                "HttpVersion": "http2",
                "Origins": [{
                    "Id": origin_id,
                    "DomainName": get_att(BUCKET, "RegionalDomainName"),
                    "S3OriginConfig": { "OriginAccessIdentity": "" },
                    "OriginAccessControlId": get_att(ORIGIN_ACCESS_CONTROL, "Id")
                }],
                "DefaultCacheBehavior": {
                    "TargetOriginId": origin_id,
                    "ViewerProtocolPolicy": "redirect-to-https",
                    "CachePolicyId": CACHING_OPTIMIZED_POLICY_ID,
                    "Compress": true
                },
                "CustomErrorResponses": [spa_fallback(403), spa_fallback(404)],
                "ViewerCertificate": {
                    "CloudFrontDefaultCertificate": true,
                    "MinimumProtocolVersion": "TLSv1.2_2021"
                }
            }
        }),
    );
}
