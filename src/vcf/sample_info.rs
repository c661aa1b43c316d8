//! Per-sample FORMAT key -> values store.

use indexmap::IndexMap;

/// FORMAT keys whose values are floating point; every other key is
/// integer-valued (SPEC_FULL.md §3: "integer fields (GT, coverages, GAPS
/// when integer) and float fields (LIKELIHOOD, GT_CONF)").
const FLOAT_KEYS: &[&str] = &["LIKELIHOOD", "GT_CONF"];

fn is_float_key(key: &str) -> bool {
    FLOAT_KEYS.contains(&key)
}

/// One sample's per-FORMAT-key values. Missing ⇢ empty vector; the `GT`
/// vector has length ≤ 1 (haploid).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleInfo {
    ints: IndexMap<String, Vec<i64>>,
    floats: IndexMap<String, Vec<f64>>,
}

impl SampleInfo {
    pub fn new() -> Self {
        SampleInfo::default()
    }

    pub fn get_ints(&self, key: &str) -> &[i64] {
        self.ints.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_ints(&mut self, key: &str, values: Vec<i64>) {
        self.ints.insert(key.to_string(), values);
    }

    pub fn get_floats(&self, key: &str) -> &[f64] {
        self.floats.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_floats(&mut self, key: &str, values: Vec<f64>) {
        self.floats.insert(key.to_string(), values);
    }

    pub fn clear(&mut self, key: &str) {
        self.ints.remove(key);
        self.floats.remove(key);
    }

    /// The haploid genotype, if called (`None` means no-call, `./`.).
    pub fn gt(&self) -> Option<i64> {
        self.get_ints("GT").first().copied()
    }

    pub fn set_gt(&mut self, gt: Option<i64>) {
        match gt {
            Some(allele) => self.set_ints("GT", vec![allele]),
            None => self.set_ints("GT", Vec::new()),
        }
    }

    pub fn has_gt(&self) -> bool {
        !self.get_ints("GT").is_empty()
    }

    pub fn likelihoods(&self) -> &[f64] {
        self.get_floats("LIKELIHOOD")
    }

    pub fn set_likelihoods(&mut self, values: Vec<f64>) {
        self.set_floats("LIKELIHOOD", values);
    }

    pub fn gt_conf(&self) -> Option<f64> {
        self.get_floats("GT_CONF").first().copied()
    }

    pub fn set_gt_conf(&mut self, v: f64) {
        self.set_floats("GT_CONF", vec![v]);
    }

    /// Insert an allele index `new_allele_idx` into a GT whose genotype
    /// equals `old_allele_idx`, used by `merge_multi_allelic` when a
    /// successor's `GT={1}` becomes `GT={k}` at the merged predecessor.
    pub fn remap_gt(&mut self, old_allele_idx: i64, new_allele_idx: i64) {
        if self.gt() == Some(old_allele_idx) {
            self.set_gt(Some(new_allele_idx));
        }
    }

    /// Render this sample's column for the given FORMAT key order.
    pub fn to_field_string(&self, format_keys: &[String]) -> String {
        format_keys
            .iter()
            .map(|key| {
                if is_float_key(key) {
                    let v = self.get_floats(key);
                    if v.is_empty() {
                        ".".to_string()
                    } else {
                        v.iter()
                            .map(|f| format!("{f}"))
                            .collect::<Vec<_>>()
                            .join(",")
                    }
                } else {
                    let v = self.get_ints(key);
                    if v.is_empty() {
                        ".".to_string()
                    } else {
                        v.iter()
                            .map(|i| i.to_string())
                            .collect::<Vec<_>>()
                            .join(",")
                    }
                }
            })
            .collect::<Vec<_>>()
            .join(":")
    }

    pub fn from_field_string(s: &str, format_keys: &[String]) -> Self {
        let mut info = SampleInfo::new();
        for (key, value) in format_keys.iter().zip(s.split(':')) {
            if value == "." || value.is_empty() {
                continue;
            }
            if is_float_key(key) {
                let values: Vec<f64> = value
                    .split(',')
                    .filter_map(|v| v.parse::<f64>().ok())
                    .collect();
                info.set_floats(key, values);
            } else {
                let values: Vec<i64> = value
                    .split(',')
                    .filter_map(|v| v.parse::<i64>().ok())
                    .collect();
                info.set_ints(key, values);
            }
        }
        info
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn gt_round_trips_through_field_string() {
        let mut info = SampleInfo::new();
        info.set_gt(Some(1));
        info.set_likelihoods(vec![-5.0, -1.0]);

        let keys = vec!["GT".to_string(), "LIKELIHOOD".to_string()];
        let s = info.to_field_string(&keys);
        assert_eq!(s, "1:-5,-1");

        let parsed = SampleInfo::from_field_string(&s, &keys);
        assert_eq!(parsed.gt(), Some(1));
        assert_eq!(parsed.likelihoods(), &[-5.0, -1.0]);
    }

    #[test]
    fn missing_fields_serialize_as_dot() {
        let info = SampleInfo::new();
        let keys = vec!["GT".to_string()];
        assert_eq!(info.to_field_string(&keys), ".");
    }

    #[test]
    fn remap_gt_only_touches_matching_allele() {
        let mut info = SampleInfo::new();
        info.set_gt(Some(1));
        info.remap_gt(1, 2);
        assert_eq!(info.gt(), Some(2));

        let mut other = SampleInfo::new();
        other.set_gt(Some(0));
        other.remap_gt(1, 2);
        assert_eq!(other.gt(), Some(0));
    }
}
