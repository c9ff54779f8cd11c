//! Field mutability classification.
//!
//! Every attribute of a [`ResourceSpec`] has an entry in a policy table
//! saying whether a change to it can be applied in place. Comparing two
//! specs evaluates each changed attribute against the table and reduces to
//! the strictest verdict.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::ResourceSpec;

/// A spec attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    Name,
    Vcpus,
    MemoryGb,
    BaseImage,
    RootDiskGb,
    SshUser,
    SshPublicKey,
}

impl Attribute {
    /// All attributes, in declaration order.
    pub const ALL: [Attribute; 7] = [
        Attribute::Name,
        Attribute::Vcpus,
        Attribute::MemoryGb,
        Attribute::BaseImage,
        Attribute::RootDiskGb,
        Attribute::SshUser,
        Attribute::SshPublicKey,
    ];

    /// Field name as it appears in manifests and state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Vcpus => "vcpus",
            Self::MemoryGb => "memory_gb",
            Self::BaseImage => "base_image",
            Self::RootDiskGb => "root_disk_gb",
            Self::SshUser => "ssh_user",
            Self::SshPublicKey => "ssh_public_key",
        }
    }

    /// Returns true if `a` and `b` differ in this attribute.
    pub fn differs(&self, a: &ResourceSpec, b: &ResourceSpec) -> bool {
        match self {
            Self::Name => a.name != b.name,
            Self::Vcpus => a.vcpus != b.vcpus,
            Self::MemoryGb => a.memory_gb != b.memory_gb,
            Self::BaseImage => a.base_image != b.base_image,
            Self::RootDiskGb => a.root_disk_gb != b.root_disk_gb,
            Self::SshUser => a.ssh_user != b.ssh_user,
            Self::SshPublicKey => a.ssh_public_key != b.ssh_public_key,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a change to one attribute can be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// The running VM can be updated.
    InPlace,

    /// The VM must be destroyed and recreated.
    RequiresReplacement,
}

/// Verdict for a whole spec change.
///
/// Ordered by strictness so verdicts reduce with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeClass {
    NoChange,
    InPlaceUpdatable,
    RequiresReplacement,
}

impl From<Mutability> for ChangeClass {
    fn from(m: Mutability) -> Self {
        match m {
            Mutability::InPlace => Self::InPlaceUpdatable,
            Mutability::RequiresReplacement => Self::RequiresReplacement,
        }
    }
}

impl fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoChange => "no change",
            Self::InPlaceUpdatable => "update in place",
            Self::RequiresReplacement => "requires replacement",
        })
    }
}

/// Current policy. Allowing e.g. vCPU hot-plug is an edit to one row.
pub const DEFAULT_POLICY: [(Attribute, Mutability); 7] = [
    (Attribute::Name, Mutability::RequiresReplacement),
    (Attribute::Vcpus, Mutability::RequiresReplacement),
    (Attribute::MemoryGb, Mutability::RequiresReplacement),
    (Attribute::BaseImage, Mutability::RequiresReplacement),
    (Attribute::RootDiskGb, Mutability::RequiresReplacement),
    (Attribute::SshUser, Mutability::RequiresReplacement),
    (Attribute::SshPublicKey, Mutability::RequiresReplacement),
];

/// A single changed attribute and its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeChange {
    pub attribute: Attribute,
    pub class: ChangeClass,
}

/// Result of comparing two specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Strictest verdict across all changes.
    pub verdict: ChangeClass,

    /// Changed attributes, in declaration order.
    pub changes: Vec<AttributeChange>,
}

impl Classification {
    /// Attributes whose change forces replacement.
    pub fn replacing(&self) -> Vec<Attribute> {
        self.changes
            .iter()
            .filter(|c| c.class == ChangeClass::RequiresReplacement)
            .map(|c| c.attribute)
            .collect()
    }
}

/// Attribute → mutability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutabilityPolicy {
    table: BTreeMap<Attribute, Mutability>,
}

impl Default for MutabilityPolicy {
    fn default() -> Self {
        Self::from_table(DEFAULT_POLICY)
    }
}

impl MutabilityPolicy {
    /// Build a policy from explicit rows. Attributes without a row require
    /// replacement.
    pub fn from_table(rows: impl IntoIterator<Item = (Attribute, Mutability)>) -> Self {
        Self {
            table: rows.into_iter().collect(),
        }
    }

    /// Mutability of one attribute.
    pub fn mutability(&self, attribute: Attribute) -> Mutability {
        self.table
            .get(&attribute)
            .copied()
            .unwrap_or(Mutability::RequiresReplacement)
    }

    /// Classify the change from `previous` to `proposed`.
    pub fn classify(&self, previous: &ResourceSpec, proposed: &ResourceSpec) -> Classification {
        let changes: Vec<AttributeChange> = Attribute::ALL
            .iter()
            .filter(|attr| attr.differs(previous, proposed))
            .map(|&attribute| AttributeChange {
                attribute,
                class: self.mutability(attribute).into(),
            })
            .collect();

        let verdict = changes
            .iter()
            .map(|c| c.class)
            .max()
            .unwrap_or(ChangeClass::NoChange);

        Classification { verdict, changes }
    }
}
