// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core types for ifcXML data representation
//!
//! Identifiers, dialects and the tag classification used by every pass of the
//! ingestion pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Store-generated entity identifier
///
/// Handed out by the storage collaborator when an entity row is inserted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Default, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        EntityId(id)
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new_v4() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Model scope: one per processed file
    ModelId
);
uuid_id!(
    /// Tenant scope
    TenantId
);
uuid_id!(
    /// Upload job identifier
    JobId
);

/// Supported ifcXML schema dialects
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum IfcVersion {
    #[serde(rename = "IFC2X3")]
    Ifc2x3,
    #[serde(rename = "IFC4")]
    Ifc4,
}

impl IfcVersion {
    /// All supported dialects
    pub const ALL: [IfcVersion; 2] = [IfcVersion::Ifc2x3, IfcVersion::Ifc4];

    /// Canonical dialect key ("IFC2X3" / "IFC4")
    pub fn as_str(&self) -> &'static str {
        match self {
            IfcVersion::Ifc2x3 => "IFC2X3",
            IfcVersion::Ifc4 => "IFC4",
        }
    }
}

impl fmt::Display for IfcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IfcVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IFC2X3" => Ok(IfcVersion::Ifc2x3),
            "IFC4" => Ok(IfcVersion::Ifc4),
            other => Err(format!("unsupported ifcXML version: {}", other)),
        }
    }
}

/// Spatial hierarchy node kinds
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum HierarchyKind {
    Project,
    Site,
    Building,
    Storey,
    Space,
}

impl HierarchyKind {
    /// Map a local tag name to a hierarchy kind
    pub fn from_tag(local_name: &str) -> Option<Self> {
        match local_name {
            "IfcProject" => Some(HierarchyKind::Project),
            "IfcSite" => Some(HierarchyKind::Site),
            "IfcBuilding" => Some(HierarchyKind::Building),
            "IfcBuildingStorey" => Some(HierarchyKind::Storey),
            "IfcSpace" => Some(HierarchyKind::Space),
            _ => None,
        }
    }
}

/// Building element tag names recognised besides the `IfcBuildingElement*` prefix
pub const BUILDING_ELEMENT_TAGS: &[&str] = &[
    "IfcWall",
    "IfcSlab",
    "IfcDoor",
    "IfcWindow",
    "IfcBeam",
    "IfcColumn",
    "IfcRoof",
    "IfcStair",
    "IfcRailing",
    "IfcCurtainWall",
    "IfcPlate",
    "IfcMember",
    "IfcCovering",
    "IfcOpeningElement",
    "IfcBuildingElementProxy",
];

const BUILDING_ELEMENT_PREFIX: &str = "IfcBuildingElement";

/// Classification of an element's local tag name
///
/// Every tag falls into exactly one class.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TagClass {
    /// Project, site, building, storey or space
    Hierarchy(HierarchyKind),
    /// Construction element (wall, slab, door, ...)
    BuildingElement,
    /// Anything else
    Ignored,
}

impl TagClass {
    /// Classify a local tag name (namespace prefix already stripped)
    pub fn classify(local_name: &str) -> Self {
        if let Some(kind) = HierarchyKind::from_tag(local_name) {
            return TagClass::Hierarchy(kind);
        }
        if BUILDING_ELEMENT_TAGS.contains(&local_name)
            || local_name.starts_with(BUILDING_ELEMENT_PREFIX)
        {
            return TagClass::BuildingElement;
        }
        TagClass::Ignored
    }

    /// True for hierarchy entities and building elements
    pub fn is_entity(&self) -> bool {
        !matches!(self, TagClass::Ignored)
    }
}

/// Relationship element tag names scanned by the resolver
pub const RELATIONSHIP_TAGS: &[&str] = &[
    "IfcRelContainedInSpatialStructure",
    "IfcRelAggregates",
    "IfcRelVoidsElement",
    "IfcRelFillsElement",
];

/// Kind of a relationship edge
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Contains,
    Aggregates,
    Voids,
    Fills,
}

impl RelationshipType {
    /// Derive the edge kind from a relationship tag name by substring match
    ///
    /// Anything that is not an aggregation, voiding or filling is containment.
    pub fn from_tag(local_name: &str) -> Self {
        if local_name.contains("Aggregates") {
            RelationshipType::Aggregates
        } else if local_name.contains("Voids") {
            RelationshipType::Voids
        } else if local_name.contains("Fills") {
            RelationshipType::Fills
        } else {
            RelationshipType::Contains
        }
    }

    /// True when the tag is one of the four scanned relationship kinds
    pub fn is_relationship_tag(local_name: &str) -> bool {
        RELATIONSHIP_TAGS.iter().any(|tag| local_name.contains(tag))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Contains => "CONTAINS",
            RelationshipType::Aggregates => "AGGREGATES",
            RelationshipType::Voids => "VOIDS",
            RelationshipType::Fills => "FILLS",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_hierarchy() {
        assert_eq!(
            TagClass::classify("IfcBuildingStorey"),
            TagClass::Hierarchy(HierarchyKind::Storey)
        );
        assert_eq!(
            TagClass::classify("IfcProject"),
            TagClass::Hierarchy(HierarchyKind::Project)
        );
    }

    #[test]
    fn test_classify_elements() {
        assert_eq!(TagClass::classify("IfcWall"), TagClass::BuildingElement);
        assert_eq!(
            TagClass::classify("IfcBuildingElementPart"),
            TagClass::BuildingElement
        );
        assert_eq!(TagClass::classify("IfcWallType"), TagClass::Ignored);
        assert_eq!(TagClass::classify("IfcPropertySet"), TagClass::Ignored);
    }

    #[test]
    fn test_relationship_type_from_tag() {
        assert_eq!(
            RelationshipType::from_tag("IfcRelAggregates"),
            RelationshipType::Aggregates
        );
        assert_eq!(
            RelationshipType::from_tag("IfcRelVoidsElement"),
            RelationshipType::Voids
        );
        assert_eq!(
            RelationshipType::from_tag("IfcRelFillsElement"),
            RelationshipType::Fills
        );
        assert_eq!(
            RelationshipType::from_tag("IfcRelContainedInSpatialStructure"),
            RelationshipType::Contains
        );
        assert!(RelationshipType::is_relationship_tag("IfcRelAggregates"));
        assert!(!RelationshipType::is_relationship_tag("IfcRelDefinesByProperties"));
    }

    #[test]
    fn test_version_roundtrip_names() {
        assert_eq!("ifc2x3".parse::<IfcVersion>(), Ok(IfcVersion::Ifc2x3));
        assert_eq!(IfcVersion::Ifc4.to_string(), "IFC4");
        assert!("IFC4X3".parse::<IfcVersion>().is_err());
    }
}
