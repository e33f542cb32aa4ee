//! Vector session token
//!
//! String form: `{version}#{globalLsn}[#{regionId}={localLsn}]*`
//!
//! A token is an immutable value. Merging produces a new token holding the
//! element-wise maximum; nothing is ever updated in place.

use std::cmp;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::errors::{SessionResult, SessionTokenError};

const SEGMENT_SEPARATOR: char = '#';
const REGION_SEPARATOR: char = '=';

/// Vector clock of per-region LSNs for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken {
    version: u64,
    global_lsn: i64,
    local_lsn_by_region: BTreeMap<u32, i64>,
}

impl SessionToken {
    /// Build a token from its parts.
    pub fn new(version: u64, global_lsn: i64, local_lsn_by_region: BTreeMap<u32, i64>) -> Self {
        Self {
            version,
            global_lsn,
            local_lsn_by_region,
        }
    }

    /// Partition configuration generation.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Global LSN.
    pub fn global_lsn(&self) -> i64 {
        self.global_lsn
    }

    /// Local LSN recorded for `region`, if the token tracks it.
    pub fn local_lsn(&self, region: u32) -> Option<i64> {
        self.local_lsn_by_region.get(&region).copied()
    }

    /// Region ids tracked by this token, ascending.
    pub fn regions(&self) -> impl Iterator<Item = u32> + '_ {
        self.local_lsn_by_region.keys().copied()
    }

    /// Parse the string form. Malformed input is an error, never a default.
    pub fn parse(raw: &str) -> SessionResult<Self> {
        let mut segments = raw.split(SEGMENT_SEPARATOR);

        let version = match segments.next() {
            Some(s) if !s.is_empty() => s
                .parse::<u64>()
                .map_err(|_| SessionTokenError::malformed(raw, format!("invalid version '{}'", s)))?,
            _ => return Err(SessionTokenError::malformed(raw, "missing version")),
        };

        let global_lsn = match segments.next() {
            Some(s) if !s.is_empty() => s.parse::<i64>().map_err(|_| {
                SessionTokenError::malformed(raw, format!("invalid global lsn '{}'", s))
            })?,
            _ => return Err(SessionTokenError::malformed(raw, "missing global lsn")),
        };

        let mut local_lsn_by_region = BTreeMap::new();
        for segment in segments {
            let (region, lsn) = segment.split_once(REGION_SEPARATOR).ok_or_else(|| {
                SessionTokenError::malformed(raw, format!("region segment '{}' has no '='", segment))
            })?;
            let region = region.parse::<u32>().map_err(|_| {
                SessionTokenError::malformed(raw, format!("invalid region id '{}'", region))
            })?;
            let lsn = lsn.parse::<i64>().map_err(|_| {
                SessionTokenError::malformed(raw, format!("invalid local lsn '{}'", lsn))
            })?;
            if local_lsn_by_region.insert(region, lsn).is_some() {
                return Err(SessionTokenError::malformed(
                    raw,
                    format!("duplicate region id {}", region),
                ));
            }
        }

        Ok(Self {
            version,
            global_lsn,
            local_lsn_by_region,
        })
    }

    /// Merge two tokens into their element-wise maximum.
    ///
    /// With different versions the higher-version token's region set wins;
    /// regions it lacks belonged to an older topology and are dropped.
    /// With equal versions the region sets must be identical.
    pub fn merge(&self, other: &SessionToken) -> SessionResult<SessionToken> {
        let same_version = self.version == other.version;
        if same_version && self.local_lsn_by_region.len() != other.local_lsn_by_region.len() {
            return Err(self.region_mismatch(other));
        }

        let (higher, lower) = if self.version >= other.version {
            (self, other)
        } else {
            (other, self)
        };

        let mut merged = BTreeMap::new();
        for (region, lsn) in &higher.local_lsn_by_region {
            match lower.local_lsn_by_region.get(region) {
                Some(other_lsn) => {
                    merged.insert(*region, cmp::max(*lsn, *other_lsn));
                }
                None if same_version => return Err(self.region_mismatch(other)),
                None => {
                    merged.insert(*region, *lsn);
                }
            }
        }

        Ok(SessionToken {
            version: cmp::max(self.version, other.version),
            global_lsn: cmp::max(self.global_lsn, other.global_lsn),
            local_lsn_by_region: merged,
        })
    }

    /// Whether `other` has progressed at least as far as `self`.
    ///
    /// A region of `self` missing from `other` is tolerated only when
    /// `other` comes from a newer configuration.
    pub fn is_valid(&self, other: &SessionToken) -> bool {
        if other.version < self.version || other.global_lsn < self.global_lsn {
            return false;
        }

        for (region, lsn) in &self.local_lsn_by_region {
            match other.local_lsn_by_region.get(region) {
                Some(other_lsn) if other_lsn < lsn => return false,
                Some(_) => {}
                None if other.version > self.version => {}
                None => return false,
            }
        }

        true
    }

    fn region_mismatch(&self, other: &SessionToken) -> SessionTokenError {
        SessionTokenError::RegionMismatch {
            version: self.version,
            left: self.to_string(),
            right: other.to_string(),
        }
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.version, SEGMENT_SEPARATOR, self.global_lsn)?;
        for (region, lsn) in &self.local_lsn_by_region {
            write!(f, "{}{}{}{}", SEGMENT_SEPARATOR, region, REGION_SEPARATOR, lsn)?;
        }
        Ok(())
    }
}

impl FromStr for SessionToken {
    type Err = SessionTokenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl Serialize for SessionToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn token(raw: &str) -> SessionToken {
        SessionToken::parse(raw).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let t = token("1#100#1=50#2=40");
        assert_eq!(t.version(), 1);
        assert_eq!(t.global_lsn(), 100);
        assert_eq!(t.local_lsn(1), Some(50));
        assert_eq!(t.local_lsn(2), Some(40));
        assert_eq!(t.local_lsn(3), None);
        assert_eq!(t.to_string(), "1#100#1=50#2=40");
    }

    #[test]
    fn test_parse_without_regions() {
        let t = token("3#7");
        assert_eq!(t.regions().count(), 0);
        assert_eq!(t.to_string(), "3#7");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for raw in [
            "", "1", "1#", "#5", "x#1", "1#y", "1#1#2", "1#1#a=3", "1#1#2=b", "1#1#2=3#2=4",
            "1#1#=3",
        ] {
            assert!(SessionToken::parse(raw).is_err(), "accepted '{}'", raw);
        }
    }

    #[test]
    fn test_merge_scenario() {
        let merged = token("1#100#1=50#2=40")
            .merge(&token("1#120#1=55#2=30"))
            .unwrap();
        assert_eq!(merged.to_string(), "1#120#1=55#2=40");
    }

    #[test]
    fn test_merge_equal_version_region_mismatch() {
        let err = token("1#100#1=50#2=40")
            .merge(&token("1#100#1=50#3=40"))
            .unwrap_err();
        assert!(err.is_consistency_violation());

        let err = token("1#100#1=50")
            .merge(&token("1#100#1=50#2=1"))
            .unwrap_err();
        assert!(err.is_consistency_violation());
    }

    #[test]
    fn test_merge_higher_version_region_set_wins() {
        let old = token("1#100#1=50");
        let new = token("2#90#1=40#2=10");
        let merged = old.merge(&new).unwrap();
        assert_eq!(merged.to_string(), "2#100#1=50#2=10");

        let older_with_extra = token("1#100#1=50#3=70");
        let merged = older_with_extra.merge(&new).unwrap();
        assert_eq!(merged.to_string(), "2#100#1=50#2=10");
    }

    #[test]
    fn test_is_valid() {
        let required = token("1#100#1=50#2=40");
        assert!(required.is_valid(&required));
        assert!(required.is_valid(&token("1#101#1=50#2=41")));
        assert!(!required.is_valid(&token("1#99#1=50#2=40")));
        assert!(!required.is_valid(&token("1#100#1=49#2=40")));
        assert!(!required.is_valid(&token("0#200#1=90#2=90")));
        // Missing region tolerated only from a newer version.
        assert!(!required.is_valid(&token("1#100#1=50")));
        assert!(required.is_valid(&token("2#100#1=50")));
    }

    fn random_token(rng: &mut StdRng, version: u64, regions: &[u32]) -> SessionToken {
        let mut map = BTreeMap::new();
        for region in regions {
            map.insert(*region, rng.gen_range(0..1_000));
        }
        SessionToken::new(version, rng.gen_range(0..10_000), map)
    }

    #[test]
    fn test_merge_properties_fuzz_like() {
        let mut rng = StdRng::seed_from_u64(0x5e55_10c7);
        let region_sets: [&[u32]; 3] = [&[1], &[1, 2], &[1, 2, 3]];

        for _ in 0..1_000 {
            let va = rng.gen_range(0..3u64);
            let vb = rng.gen_range(0..3u64);
            // Newer versions carry at least as many regions.
            let a = random_token(&mut rng, va, region_sets[va as usize]);
            let b = random_token(&mut rng, vb, region_sets[vb as usize]);

            let ab = a.merge(&b).unwrap();
            let ba = b.merge(&a).unwrap();
            assert_eq!(ab, ba);
            assert_eq!(a.merge(&a).unwrap(), a);
            assert!(a.is_valid(&ab));
            assert!(b.is_valid(&ab));

            let c = random_token(&mut rng, vb, region_sets[vb as usize]);
            let left = a.merge(&b).unwrap().merge(&c).unwrap();
            let right = a.merge(&b.merge(&c).unwrap()).unwrap();
            assert_eq!(left, right);

            let reparsed = SessionToken::parse(&ab.to_string()).unwrap();
            assert_eq!(reparsed, ab);
        }
    }

    #[test]
    fn test_serde_as_string() {
        let t = token("4#9#0=3");
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"4#9#0=3\"");
        let back: SessionToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<SessionToken>("\"4\"").is_err());
    }
}
