//! `FeatureType` and the accepted-types bitset shared by the tile decoder,
//! the matcher, and the query executor (spec §3.3, §4.4, §4.5).

/// TypeCode as packed into a feature header: node=0, way=1, relation=2
/// (spec §3.3). "Area" is not a fourth on-disk type code; it is the
/// `AREA` flag set on a way or relation (spec glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureType {
    Node = 0,
    Way = 1,
    Relation = 2,
}

impl FeatureType {
    pub fn from_type_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FeatureType::Node),
            1 => Some(FeatureType::Way),
            2 => Some(FeatureType::Relation),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureType::Node => "node",
            FeatureType::Way => "way",
            FeatureType::Relation => "relation",
        }
    }
}

/// The four index partitions a tile maintains: nodes, ways, areas (way or
/// relation with the `AREA` flag), relations (spec §3.2, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureIndexType {
    Node = 0,
    Way = 1,
    Area = 2,
    Relation = 3,
}

impl FeatureIndexType {
    pub const ALL: [FeatureIndexType; 4] = [
        FeatureIndexType::Node,
        FeatureIndexType::Way,
        FeatureIndexType::Area,
        FeatureIndexType::Relation,
    ];
}

/// Bitset over `{node, way, area, relation}`, matching selector grammar
/// `n|w|a|r|*` (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeBits(u8);

impl TypeBits {
    pub const NODE: TypeBits = TypeBits(1 << 0);
    pub const WAY: TypeBits = TypeBits(1 << 1);
    pub const AREA: TypeBits = TypeBits(1 << 2);
    pub const RELATION: TypeBits = TypeBits(1 << 3);
    pub const NONE: TypeBits = TypeBits(0);
    pub const ALL: TypeBits = TypeBits(0b1111);

    pub fn union(self, other: TypeBits) -> TypeBits {
        TypeBits(self.0 | other.0)
    }

    pub fn contains(self, other: TypeBits) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: TypeBits) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains_index_type(self, t: FeatureIndexType) -> bool {
        self.intersects(TypeBits(1 << t as u8))
    }
}
