//! A single VCF variant record across all samples in a `VCF`.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use super::sample_info::SampleInfo;

/// One variant site. `pos` is 0-based internally, rendered 1-based on
/// output. `reference` is never the empty string -- `"."` is the sentinel
/// for "absent"; likewise `alts` is never empty (`["."]` is valid).
#[derive(Debug, Clone, PartialEq)]
pub struct VCFRecord {
    pub chrom: String,
    pub pos: usize,
    pub id: String,
    pub reference: String,
    pub alts: Vec<String>,
    pub qual: Option<f64>,
    pub filter: Vec<String>,
    pub info: IndexMap<String, String>,
    pub format_keys: Vec<String>,
    pub sample_infos: Vec<SampleInfo>,
}

impl VCFRecord {
    pub fn new(chrom: impl Into<String>, pos: usize, reference: impl Into<String>, alts: Vec<String>) -> Self {
        let reference = reference.into();
        VCFRecord {
            chrom: chrom.into(),
            pos,
            id: ".".to_string(),
            reference: if reference.is_empty() { ".".to_string() } else { reference },
            alts: if alts.is_empty() { vec![".".to_string()] } else { alts },
            qual: None,
            filter: Vec::new(),
            info: IndexMap::new(),
            format_keys: vec!["GT".to_string()],
            sample_infos: Vec::new(),
        }
    }

    /// End of the reference span, half-open: `[pos, end)`. Matches the
    /// interval-tree key of `[pos, pos + ref.len() + 1)` minus its padding.
    pub fn ref_end(&self) -> usize {
        let ref_len = if self.reference == "." { 0 } else { self.reference.len() };
        self.pos + ref_len.max(1)
    }

    pub fn overlaps(&self, other: &VCFRecord) -> bool {
        self.chrom == other.chrom && self.pos < other.ref_end() && other.pos < self.ref_end()
    }

    pub fn identity_key(&self) -> (String, usize, String, Vec<String>) {
        (
            self.chrom.clone(),
            self.pos,
            self.reference.clone(),
            self.alts.clone(),
        )
    }

    /// Whether this site qualifies for `merge_multi_allelic`: a single alt,
    /// with every allele no longer than `max_allele_length`.
    pub fn is_mergeable(&self, max_allele_length: usize) -> bool {
        self.alts.len() == 1
            && self.reference.len() <= max_allele_length
            && self.alts[0].len() <= max_allele_length
    }

    pub fn ensure_sample_count(&mut self, n: usize) {
        while self.sample_infos.len() < n {
            self.sample_infos.push(SampleInfo::new());
        }
    }

    /// `true` once `reference` has been blanked out by `correct_dot_alleles`
    /// to mark this record for removal by `clean`.
    pub fn is_cleared(&self) -> bool {
        self.reference.is_empty()
    }

    pub fn is_snp(&self) -> bool {
        self.reference.len() == 1 && self.alts.first().map(|a| a.len() == 1).unwrap_or(false)
    }

    pub fn to_line(&self) -> String {
        let qual = self.qual.map(|q| format!("{q}")).unwrap_or_else(|| ".".to_string());
        let filter = if self.filter.is_empty() {
            ".".to_string()
        } else {
            self.filter.join(";")
        };
        let info = if self.info.is_empty() {
            ".".to_string()
        } else {
            self.info
                .iter()
                .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
                .collect::<Vec<_>>()
                .join(";")
        };
        let format = self.format_keys.join(":");
        let samples: Vec<String> = self
            .sample_infos
            .iter()
            .map(|s| s.to_field_string(&self.format_keys))
            .collect();
        let mut fields = vec![
            self.chrom.clone(),
            (self.pos + 1).to_string(),
            self.id.clone(),
            self.reference.clone(),
            self.alts.join(","),
            qual,
            filter,
            info,
            format,
        ];
        fields.extend(samples);
        fields.join("\t")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid VCF record line: {0}")]
pub struct RecordParseError(pub String);

impl fmt::Display for VCFRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line())
    }
}

impl VCFRecord {
    pub fn parse_line(line: &str) -> Result<Self, RecordParseError> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 9 {
            return Err(RecordParseError(line.to_string()));
        }
        let pos: usize = fields[1]
            .parse::<usize>()
            .map_err(|_| RecordParseError(line.to_string()))?
            .checked_sub(1)
            .ok_or_else(|| RecordParseError(line.to_string()))?;
        let qual = match fields[5] {
            "." => None,
            s => Some(s.parse::<f64>().map_err(|_| RecordParseError(line.to_string()))?),
        };
        let filter = match fields[6] {
            "." => Vec::new(),
            s => s.split(';').map(str::to_string).collect(),
        };
        let mut info = IndexMap::new();
        if fields[7] != "." {
            for kv in fields[7].split(';') {
                match kv.split_once('=') {
                    Some((k, v)) => {
                        info.insert(k.to_string(), v.to_string());
                    }
                    None => {
                        info.insert(kv.to_string(), String::new());
                    }
                }
            }
        }
        let format_keys: Vec<String> = fields[8].split(':').map(str::to_string).collect();
        let sample_infos = fields[9..]
            .iter()
            .map(|s| SampleInfo::from_field_string(s, &format_keys))
            .collect();

        Ok(VCFRecord {
            chrom: fields[0].to_string(),
            pos,
            id: fields[2].to_string(),
            reference: fields[3].to_string(),
            alts: fields[4].split(',').map(str::to_string).collect(),
            qual,
            filter,
            info,
            format_keys,
            sample_infos,
        })
    }
}

impl FromStr for VCFRecord {
    type Err = RecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VCFRecord::parse_line(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_line_format() {
        let mut rec = VCFRecord::new("chr1", 99, "A", vec!["C".to_string(), "G".to_string()]);
        let mut s = SampleInfo::new();
        s.set_gt(Some(1));
        rec.sample_infos.push(s);

        let line = rec.to_line();
        assert!(line.starts_with("chr1\t100\t.\tA\tC,G\t.\t.\t.\tGT\t1"));

        let parsed = VCFRecord::parse_line(&line).unwrap();
        assert_eq!(parsed.chrom, "chr1");
        assert_eq!(parsed.pos, 99);
        assert_eq!(parsed.alts, vec!["C", "G"]);
        assert_eq!(parsed.sample_infos[0].gt(), Some(1));
    }

    #[test]
    fn overlap_is_chrom_and_range_sensitive() {
        let a = VCFRecord::new("chr1", 10, "AAA", vec!["CCC".to_string()]);
        let b = VCFRecord::new("chr1", 11, "A", vec!["G".to_string()]);
        let c = VCFRecord::new("chr2", 11, "A", vec!["G".to_string()]);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn is_mergeable_rejects_multi_alt_or_long_alleles() {
        let single = VCFRecord::new("chr1", 0, "A", vec!["C".to_string()]);
        assert!(single.is_mergeable(10));
        let multi = VCFRecord::new("chr1", 0, "A", vec!["C".to_string(), "G".to_string()]);
        assert!(!multi.is_mergeable(10));
        let long = VCFRecord::new("chr1", 0, "AAAAAAAAAAA", vec!["C".to_string()]);
        assert!(!long.is_mergeable(5));
    }
}
