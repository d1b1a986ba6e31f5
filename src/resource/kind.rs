//! Resource kinds and their schemas.
//!
//! Each kind enumerates the inputs it recognizes, which of them are
//! required, the shape they must have and the default applied when an
//! optional input is left out. Kinds also declare the outputs a driver is
//! expected to report once the resource exists.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::{InputValue, ValueShape};

/// The kinds of infrastructure resources a graph can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A VPC.
    Network,
    /// A subnet inside a network.
    Subnet,
    /// A security group with one rule.
    SecurityGroupRule,
    /// An IAM role.
    Role,
    /// A managed Kubernetes control plane.
    ManagedCluster,
    /// A compute instance (bastion host, worker).
    ComputeInstance,
    /// A VPC endpoint for a provider service.
    Endpoint,
}

/// Declared type of a resource output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// A string value.
    String,
    /// A list of strings.
    StringList,
    /// A number.
    Number,
    /// A boolean.
    Bool,
}

/// Default applied to an optional input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDefault {
    /// No default; the input stays absent.
    None,
    /// A string default.
    Str(&'static str),
    /// A boolean default.
    Bool(bool),
    /// An integer default.
    Int(i64),
    /// An empty list.
    EmptyList,
    /// An empty map.
    EmptyMap,
}

/// A recognized input field.
#[derive(Debug, Clone, Copy)]
pub struct InputField {
    /// Field name.
    pub name: &'static str,
    /// Whether the field must be declared.
    pub required: bool,
    /// Expected shape of a literal value.
    pub shape: ValueShape,
    /// Default for optional fields.
    pub default: InputDefault,
}

/// Schema of a resource kind.
#[derive(Debug)]
pub struct KindSchema {
    /// Recognized inputs.
    pub inputs: &'static [InputField],
    /// Outputs every resource of this kind reports.
    pub outputs: &'static [(&'static str, OutputType)],
}

const fn required(name: &'static str, shape: ValueShape) -> InputField {
    InputField {
        name,
        required: true,
        shape,
        default: InputDefault::None,
    }
}

const fn optional(name: &'static str, shape: ValueShape, default: InputDefault) -> InputField {
    InputField {
        name,
        required: false,
        shape,
        default,
    }
}

static NETWORK: KindSchema = KindSchema {
    inputs: &[
        optional("cidr", ValueShape::String, InputDefault::Str("10.0.0.0/16")),
        required("availability_zones", ValueShape::List),
        optional("enable_dns_hostnames", ValueShape::Bool, InputDefault::Bool(true)),
        optional("enable_dns_support", ValueShape::Bool, InputDefault::Bool(true)),
        optional("nat_gateways", ValueShape::Integer, InputDefault::Int(0)),
    ],
    outputs: &[
        ("network_id", OutputType::String),
        ("cidr_block", OutputType::String),
        ("internet_gateway_id", OutputType::String),
    ],
};

static SUBNET: KindSchema = KindSchema {
    inputs: &[
        required("network", ValueShape::String),
        required("availability_zone", ValueShape::String),
        optional("subnet_type", ValueShape::String, InputDefault::Str("private_isolated")),
        optional("cidr_mask", ValueShape::Integer, InputDefault::Int(18)),
        optional("nat_gateway", ValueShape::String, InputDefault::None),
    ],
    outputs: &[
        ("subnet_id", OutputType::String),
        ("route_table_id", OutputType::String),
        ("availability_zone", OutputType::String),
    ],
};

static SECURITY_GROUP_RULE: KindSchema = KindSchema {
    inputs: &[
        required("network", ValueShape::String),
        required("port", ValueShape::Integer),
        required("peer_cidr", ValueShape::String),
        optional("direction", ValueShape::String, InputDefault::Str("ingress")),
        optional("protocol", ValueShape::String, InputDefault::Str("tcp")),
        optional("description", ValueShape::String, InputDefault::Str("")),
    ],
    outputs: &[
        ("security_group_id", OutputType::String),
        ("rule_id", OutputType::String),
    ],
};

static ROLE: KindSchema = KindSchema {
    inputs: &[
        required("service_principal", ValueShape::String),
        optional("managed_policies", ValueShape::List, InputDefault::EmptyList),
        optional("inline_policies", ValueShape::Map, InputDefault::EmptyMap),
    ],
    outputs: &[
        ("role_arn", OutputType::String),
        ("role_name", OutputType::String),
    ],
};

static MANAGED_CLUSTER: KindSchema = KindSchema {
    inputs: &[
        required("subnets", ValueShape::List),
        optional("version", ValueShape::String, InputDefault::Str("1.21")),
        optional("endpoint_access", ValueShape::String, InputDefault::Str("private")),
        optional("security_groups", ValueShape::List, InputDefault::EmptyList),
        optional("secrets_encryption", ValueShape::Bool, InputDefault::Bool(true)),
        optional("pod_execution_role", ValueShape::String, InputDefault::None),
        optional("fargate_selectors", ValueShape::List, InputDefault::EmptyList),
    ],
    outputs: &[
        ("cluster_name", OutputType::String),
        ("cluster_arn", OutputType::String),
        ("endpoint", OutputType::String),
        ("cluster_security_group_id", OutputType::String),
    ],
};

static COMPUTE_INSTANCE: KindSchema = KindSchema {
    inputs: &[
        required("subnet", ValueShape::String),
        optional("instance_type", ValueShape::String, InputDefault::Str("t3.nano")),
        optional("machine_image", ValueShape::String, InputDefault::Str("amazon-linux-2")),
        optional("security_groups", ValueShape::List, InputDefault::EmptyList),
        optional("user_data", ValueShape::List, InputDefault::EmptyList),
        optional("managed_policies", ValueShape::List, InputDefault::EmptyList),
    ],
    outputs: &[
        ("instance_id", OutputType::String),
        ("private_ip", OutputType::String),
        ("role_arn", OutputType::String),
    ],
};

static ENDPOINT: KindSchema = KindSchema {
    inputs: &[
        required("network", ValueShape::String),
        required("service", ValueShape::String),
        optional("endpoint_type", ValueShape::String, InputDefault::Str("interface")),
        optional("private_dns", ValueShape::Bool, InputDefault::Bool(true)),
        optional("security_groups", ValueShape::List, InputDefault::EmptyList),
        optional("subnets", ValueShape::List, InputDefault::EmptyList),
    ],
    outputs: &[("endpoint_id", OutputType::String)],
};

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Network,
        Self::Subnet,
        Self::SecurityGroupRule,
        Self::Role,
        Self::ManagedCluster,
        Self::ComputeInstance,
        Self::Endpoint,
    ];

    /// Returns the schema for this kind.
    #[must_use]
    pub fn schema(self) -> &'static KindSchema {
        match self {
            Self::Network => &NETWORK,
            Self::Subnet => &SUBNET,
            Self::SecurityGroupRule => &SECURITY_GROUP_RULE,
            Self::Role => &ROLE,
            Self::ManagedCluster => &MANAGED_CLUSTER,
            Self::ComputeInstance => &COMPUTE_INSTANCE,
            Self::Endpoint => &ENDPOINT,
        }
    }

    /// Short prefix used for provider identifiers.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Network => "vpc",
            Self::Subnet => "subnet",
            Self::SecurityGroupRule => "sg",
            Self::Role => "role",
            Self::ManagedCluster => "eks",
            Self::ComputeInstance => "i",
            Self::Endpoint => "vpce",
        }
    }

    /// Provider service namespace used in ARNs.
    #[must_use]
    pub const fn service(self) -> &'static str {
        match self {
            Self::Role => "iam",
            Self::ManagedCluster => "eks",
            _ => "ec2",
        }
    }
}

impl KindSchema {
    /// Looks up a recognized input field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&InputField> {
        self.inputs.iter().find(|f| f.name == name)
    }

    /// Returns the names of required inputs.
    pub fn required_inputs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.inputs.iter().filter(|f| f.required).map(|f| f.name)
    }
}

impl InputDefault {
    /// Converts the default into an input value.
    #[must_use]
    pub fn to_input(self) -> Option<InputValue> {
        match self {
            Self::None => None,
            Self::Str(s) => Some(InputValue::literal(s)),
            Self::Bool(b) => Some(InputValue::literal(b)),
            Self::Int(i) => Some(InputValue::literal(i)),
            Self::EmptyList => Some(InputValue::List(Vec::new())),
            Self::EmptyMap => Some(InputValue::Map(std::collections::BTreeMap::new())),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::SecurityGroupRule => "security_group_rule",
            Self::Role => "role",
            Self::ManagedCluster => "managed_cluster",
            Self::ComputeInstance => "compute_instance",
            Self::Endpoint => "endpoint",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::StringList => "string_list",
            Self::Number => "number",
            Self::Bool => "bool",
        };
        write!(f, "{s}")
    }
}
