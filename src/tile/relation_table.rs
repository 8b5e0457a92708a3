//! Relation member table decoding (spec §3.3 "relation body", §4.3).
//!
//! Body layout at `FeaturePtr::body_offset`:
//! ```text
//! varint member_count
//! member_count * {
//!     u8 member_type          -- 0=node, 1=way, 2=relation
//!     MemberRole              -- see MemberRole::decode
//!     FeatureRef              -- see crate::tile::FeatureRef
//! }
//! ```

use crate::codec::varint::{decode_varint_safe, encode_varint};
use crate::error::{GeodeskError, Result};
use crate::feature_store::key::Key;
use crate::feature_store::string_table::StringTable;
use crate::feature_type::FeatureType;
use crate::tile::FeatureRef;

/// A relation member's role. `Outer`/`Inner` are broken out as their own
/// variants (rather than falling through to `Custom`) because multipolygon
/// area assembly (spec B.3 `AreaMemberIterator`) tests for them on every
/// member and a `GlobalStrings`-resolved integer compare is cheap; any other
/// role is either an interned string (`Custom`, most roles used in practice:
/// `"from"`, `"to"`, `"via"`, ...) or, rarely, an uninterned one (`Local`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberRole {
    Empty,
    Outer,
    Inner,
    Custom(u32),
    Local(String),
}

impl MemberRole {
    fn tag(&self) -> u8 {
        match self {
            MemberRole::Empty => 0,
            MemberRole::Outer => 1,
            MemberRole::Inner => 2,
            MemberRole::Custom(_) => 3,
            MemberRole::Local(_) => 4,
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            MemberRole::Custom(code) => encode_varint(u64::from(*code), out),
            MemberRole::Local(s) => {
                let bytes = s.as_bytes();
                encode_varint(bytes.len() as u64, out);
                out.extend_from_slice(bytes);
            }
            _ => {}
        }
    }

    fn decode(bytes: &[u8], pos: &mut usize, end: usize) -> Result<Self> {
        if *pos >= end {
            return Err(GeodeskError::corrupt(*pos as u64, "relation member table truncated"));
        }
        let tag = bytes[*pos];
        *pos += 1;
        Ok(match tag {
            0 => MemberRole::Empty,
            1 => MemberRole::Outer,
            2 => MemberRole::Inner,
            3 => MemberRole::Custom(decode_varint_safe(bytes, pos, end)? as u32),
            4 => {
                let len = decode_varint_safe(bytes, pos, end)? as usize;
                let s = std::str::from_utf8(&bytes[*pos..*pos + len])
                    .map_err(|_| GeodeskError::corrupt(*pos as u64, "member role is not valid UTF-8"))?
                    .to_string();
                *pos += len;
                MemberRole::Local(s)
            }
            other => return Err(GeodeskError::corrupt(*pos as u64, format!("unknown member role tag {other}"))),
        })
    }

    pub fn resolve<'a>(&'a self, strings: &'a StringTable) -> &'a str {
        match self {
            MemberRole::Empty => "",
            MemberRole::Outer => "outer",
            MemberRole::Inner => "inner",
            MemberRole::Custom(code) => strings.get(*code).unwrap_or(""),
            MemberRole::Local(s) => s.as_str(),
        }
    }

    pub fn from_role_str(key: &Key, role: &str) -> Self {
        match role {
            "" => MemberRole::Empty,
            "outer" => MemberRole::Outer,
            "inner" => MemberRole::Inner,
            _ => match key {
                Key::Global(code) => MemberRole::Custom(*code),
                Key::Local(_) => MemberRole::Local(role.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub member_type: FeatureType,
    pub role: MemberRole,
    pub ref_: FeatureRef,
}

#[derive(Clone, Copy)]
pub struct RelationTablePtr<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> RelationTablePtr<'a> {
    pub fn at(tile_bytes: &'a [u8], offset: u32) -> Self {
        RelationTablePtr { bytes: tile_bytes, offset: offset as usize }
    }

    /// Every member in on-disk order (spec B.3 `FastMemberIterator` yields
    /// just the refs; this port always decodes the role too, since it's a
    /// single extra byte in the common case and callers that only need refs
    /// can ignore `role`).
    pub fn members(&self) -> Result<MemberIterator<'a>> {
        let end = self.bytes.len();
        let mut pos = self.offset;
        let count = decode_varint_safe(self.bytes, &mut pos, end)?;
        Ok(MemberIterator { bytes: self.bytes, pos, end, remaining: count })
    }

    /// Members that can contribute ring geometry to a multipolygon (spec
    /// B.3 `AreaMemberIterator`): way members directly, plus relation
    /// members (a nested boundary/multipolygon relation) for the caller to
    /// descend into. Node members never contribute geometry and are always
    /// filtered out. Recursing into a member relation's own area members is
    /// `Feature::area_members`'s job, not this raw table view's -- this
    /// layer only decides which member *kinds* are geometry-bearing.
    pub fn area_members(&self) -> Result<impl Iterator<Item = Result<Member>> + 'a> {
        Ok(self.members()?.filter(|m| match m {
            Ok(member) => matches!(member.member_type, FeatureType::Way | FeatureType::Relation),
            Err(_) => true,
        }))
    }
}

pub struct MemberIterator<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
    remaining: u64,
}

impl<'a> Iterator for MemberIterator<'a> {
    type Item = Result<Member>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.decode_one())
    }
}

impl<'a> MemberIterator<'a> {
    fn decode_one(&mut self) -> Result<Member> {
        if self.pos >= self.end {
            return Err(GeodeskError::corrupt(self.pos as u64, "relation member table truncated"));
        }
        let type_code = self.bytes[self.pos];
        self.pos += 1;
        let member_type = FeatureType::from_type_code(type_code)
            .ok_or_else(|| GeodeskError::corrupt(self.pos as u64, "invalid member type code"))?;
        let role = MemberRole::decode(self.bytes, &mut self.pos, self.end)?;
        let ref_ = FeatureRef::decode(self.bytes, &mut self.pos, self.end)?;
        Ok(Member { member_type, role, ref_ })
    }
}

/// `FastMemberIterator` alias (spec B.3): same sequence, for callers that
/// intend to ignore the role/type and just follow refs.
pub type FastMemberIterator<'a> = MemberIterator<'a>;

/// `AreaMemberIterator` per spec B.3: non-multipolygon relations (no way
/// members at all) simply yield nothing.
pub fn encode_relation_body(members: &[Member]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(members.len() as u64, &mut out);
    for m in members {
        out.push(m.member_type as u8);
        m.role.encode(&mut out);
        m.ref_.encode(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members_round_trip_with_mixed_roles() {
        let members = vec![
            Member { member_type: FeatureType::Way, role: MemberRole::Outer, ref_: FeatureRef::Local(10) },
            Member { member_type: FeatureType::Way, role: MemberRole::Inner, ref_: FeatureRef::Local(20) },
            Member {
                member_type: FeatureType::Node,
                role: MemberRole::Local("stop".into()),
                ref_: FeatureRef::Local(30),
            },
        ];
        let body = encode_relation_body(&members);
        let table = RelationTablePtr::at(&body, 0);
        let decoded: Result<Vec<_>> = table.members().unwrap().collect();
        assert_eq!(decoded.unwrap(), members);
    }

    #[test]
    fn area_members_filters_out_nodes_but_keeps_ways_and_relations() {
        let members = vec![
            Member { member_type: FeatureType::Way, role: MemberRole::Outer, ref_: FeatureRef::Local(1) },
            Member { member_type: FeatureType::Node, role: MemberRole::Empty, ref_: FeatureRef::Local(2) },
            Member { member_type: FeatureType::Relation, role: MemberRole::Outer, ref_: FeatureRef::Local(3) },
        ];
        let body = encode_relation_body(&members);
        let table = RelationTablePtr::at(&body, 0);
        let areas: Vec<_> = table.area_members().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(areas.len(), 2);
        assert!(areas.iter().all(|m| m.member_type != FeatureType::Node));
    }
}
