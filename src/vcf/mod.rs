//! The VCF model: per-chrom interval-indexed records, multi-allelic merge,
//! genotype-compatibility enforcement, and text persistence.

pub mod record;
pub mod sample_info;

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::Path as FsPath;

use bio::data_structures::interval_tree::ArrayBackedIntervalTree;
use indexmap::IndexMap;

use crate::err::PandoraError;
pub use record::VCFRecord;
pub use sample_info::SampleInfo;

type IntervalTree = ArrayBackedIntervalTree<i64, usize>;

/// All variant records for a run, plus a per-chrom interval tree keyed by
/// `[pos, pos + ref.len() + 1)` whose payload is the record's index into
/// `records` (the `BgDb`/`MaskedDb` "records by chrom + tree by chrom" shape).
#[derive(Debug, Default)]
pub struct VCF {
    pub samples: Vec<String>,
    pub records: Vec<VCFRecord>,
    trees: HashMap<String, IntervalTree>,
}

impl VCF {
    pub fn new(samples: Vec<String>) -> Self {
        VCF {
            samples,
            records: Vec::new(),
            trees: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rebuild every chrom's interval tree from `records` from scratch.
    /// Called whenever the record set is mutated (SPEC_FULL.md §4.5.1).
    fn rebuild_trees(&mut self) {
        self.trees.clear();
        for (idx, record) in self.records.iter().enumerate() {
            let tree = self.trees.entry(record.chrom.clone()).or_insert_with(IntervalTree::new);
            let start = record.pos as i64;
            let end = record.ref_end() as i64 + 1;
            tree.insert(start..end, idx);
        }
        for tree in self.trees.values_mut() {
            tree.index();
        }
    }

    fn overlapping_indices(&self, record: &VCFRecord) -> Vec<usize> {
        let Some(tree) = self.trees.get(&record.chrom) else {
            return Vec::new();
        };
        let start = record.pos as i64;
        let end = record.ref_end() as i64 + 1;
        tree.find(start..end).iter().map(|e| *e.data()).collect()
    }

    /// Introduce `name` as a known sample if it isn't already, extending
    /// every existing record with an empty slot so `sample_infos.len() ==
    /// samples.len()` always holds.
    fn ensure_sample(&mut self, name: &str) -> usize {
        if let Some(idx) = self.samples.iter().position(|s| s == name) {
            return idx;
        }
        self.samples.push(name.to_string());
        let n = self.samples.len();
        for record in &mut self.records {
            record.ensure_sample_count(n);
        }
        n - 1
    }

    /// Find the index of a record with exactly this `(chrom, pos, ref,
    /// alts)` identity.
    fn find_record(&self, chrom: &str, pos: usize, reference: &str, alts: &[String]) -> Option<usize> {
        self.records.iter().position(|r| {
            r.chrom == chrom && r.pos == pos && r.reference == reference && r.alts == alts
        })
    }

    /// Merge `record`'s per-sample columns into an existing record sharing
    /// its `(chrom, pos, ref, alts)` identity, or append it as new.
    pub fn add_record(&mut self, record: VCFRecord, sample_names: &[String]) {
        let sample_idxs: Vec<usize> = sample_names.iter().map(|s| self.ensure_sample(s)).collect();

        match self.find_record(&record.chrom, record.pos, &record.reference, &record.alts) {
            Some(existing) => {
                self.records[existing].ensure_sample_count(self.samples.len());
                for (src_idx, &dst_idx) in sample_idxs.iter().enumerate() {
                    if let Some(info) = record.sample_infos.get(src_idx) {
                        self.records[existing].sample_infos[dst_idx] = info.clone();
                    }
                }
            }
            None => {
                let mut placed = VCFRecord {
                    sample_infos: Vec::new(),
                    ..record
                };
                placed.ensure_sample_count(self.samples.len());
                for (src_idx, &dst_idx) in sample_idxs.iter().enumerate() {
                    if let Some(info) = record.sample_infos.get(src_idx) {
                        placed.sample_infos[dst_idx] = info.clone();
                    }
                }
                self.records.push(placed);
            }
        }
        self.rebuild_trees();
    }

    /// Record a single-sample genotype call, per SPEC_FULL.md §4.5.
    pub fn add_sample_gt(&mut self, sample: &str, chrom: &str, pos: usize, reference: &str, alt: &str) {
        let sample_idx = self.ensure_sample(sample);
        let touched_idx;

        if let Some(idx) = self.records.iter().position(|r| {
            r.chrom == chrom && r.pos == pos && r.reference == reference && r.alts.iter().any(|a| a == alt)
        }) {
            let allele_idx = self.records[idx].alts.iter().position(|a| a == alt).unwrap() + 1;
            self.records[idx].ensure_sample_count(self.samples.len());
            self.records[idx].sample_infos[sample_idx].set_gt(Some(allele_idx as i64));
            touched_idx = idx;
        } else if reference == alt {
            if let Some(idx) = self
                .records
                .iter()
                .position(|r| r.chrom == chrom && r.pos == pos && r.reference == reference)
            {
                self.records[idx].ensure_sample_count(self.samples.len());
                self.records[idx].sample_infos[sample_idx].set_gt(Some(0));
                touched_idx = idx;
            } else {
                touched_idx = self.append_too_many_alts_record(chrom, pos, reference, alt, sample_idx);
            }
        } else {
            touched_idx = self.append_too_many_alts_record(chrom, pos, reference, alt, sample_idx);
        }

        self.rebuild_trees();
        self.propagate_ref_calls(sample_idx, touched_idx);
    }

    fn append_too_many_alts_record(
        &mut self,
        chrom: &str,
        pos: usize,
        reference: &str,
        alt: &str,
        sample_idx: usize,
    ) -> usize {
        let mut record = VCFRecord::new(chrom, pos, reference, vec![alt.to_string()]);
        record.info.insert("SVTYPE".to_string(), "COMPLEX".to_string());
        record
            .info
            .insert("GRAPHTYPE".to_string(), "TOO_MANY_ALTS".to_string());
        record.ensure_sample_count(self.samples.len());
        record.sample_infos[sample_idx].set_gt(Some(1));
        self.records.push(record);
        self.records.len() - 1
    }

    /// If `sample` already carries `GT={0}` at some other record overlapping
    /// `touched_idx`, overwrite the just-created call with `GT={0}` too.
    fn propagate_ref_calls(&mut self, sample_idx: usize, touched_idx: usize) {
        let overlapping = self.overlapping_indices(&self.records[touched_idx].clone());
        let has_ref_call = overlapping
            .iter()
            .filter(|&&i| i != touched_idx)
            .any(|&i| self.records[i].sample_infos.get(sample_idx).and_then(|s| s.gt()) == Some(0));
        if has_ref_call {
            self.records[touched_idx].sample_infos[sample_idx].set_gt(Some(0));
        }
    }

    fn sort_records(&mut self) {
        self.records.sort_by(|a, b| {
            a.chrom
                .cmp(&b.chrom)
                .then_with(|| a.pos.cmp(&b.pos))
                .then_with(|| a.reference.cmp(&b.reference))
                .then_with(|| a.alts.cmp(&b.alts))
        });
    }

    /// Merge consecutive single-alt records sharing `(chrom, pos, ref)` into
    /// one multi-allelic record, per SPEC_FULL.md §4.5.
    pub fn merge_multi_allelic(&mut self, max_allele_length: usize) -> Result<(), PandoraError> {
        self.sort_records();
        let mut merged: Vec<VCFRecord> = Vec::with_capacity(self.records.len());

        for record in self.records.drain(..) {
            let can_merge = merged.last().map_or(false, |prev: &VCFRecord| {
                prev.chrom == record.chrom
                    && prev.pos == record.pos
                    && prev.reference == record.reference
                    && prev.is_mergeable(max_allele_length)
                    && record.is_mergeable(max_allele_length)
            });

            if can_merge {
                let prev = merged.last_mut().unwrap();
                if prev.sample_infos.len() != record.sample_infos.len() {
                    return Err(PandoraError::InvariantViolation {
                        detail: "merge_multi_allelic: mismatched sample_infos lengths".to_string(),
                    });
                }
                let new_allele_idx = prev.alts.len() as i64 + 1;
                prev.alts.push(record.alts[0].clone());
                for (dst, src) in prev.sample_infos.iter_mut().zip(record.sample_infos.iter()) {
                    if src.gt() == Some(1) {
                        dst.set_gt(Some(new_allele_idx));
                    }
                }
            } else {
                merged.push(record);
            }
        }

        self.records = merged;
        self.rebuild_trees();
        Ok(())
    }

    /// Rewrite `.`-allele records into explicit-base records using `vcf_ref`
    /// as the reference sequence for `chrom`, then drop any record that
    /// could not be corrected.
    pub fn correct_dot_alleles(&mut self, vcf_ref: &[u8], chrom: &str) {
        for record in self.records.iter_mut().filter(|r| r.chrom == chrom) {
            let has_dot = record.reference == "." || record.alts.iter().any(|a| a == ".");
            if !has_dot {
                continue;
            }

            if record.pos > 0 {
                let prior = vcf_ref.get(record.pos - 1);
                if let Some(&base) = prior {
                    let base = (base as char).to_string();
                    let old_ref = if record.reference == "." { String::new() } else { record.reference.clone() };
                    record.reference = format!("{base}{old_ref}");
                    record.alts = record
                        .alts
                        .iter()
                        .map(|a| if a == "." { base.clone() } else { format!("{base}{a}") })
                        .collect();
                    record.pos -= 1;
                    continue;
                }
            }

            let ref_len = if record.reference == "." { 0 } else { record.reference.len() };
            let suffix = vcf_ref.get(record.pos + ref_len);
            if let Some(&base) = suffix {
                let base = (base as char).to_string();
                let old_ref = if record.reference == "." { String::new() } else { record.reference.clone() };
                record.reference = format!("{old_ref}{base}");
                record.alts = record
                    .alts
                    .iter()
                    .map(|a| if a == "." { base.clone() } else { format!("{a}{base}") })
                    .collect();
                continue;
            }

            // Neither a prior nor a following base is available: mark for removal.
            record.reference = String::new();
        }
        self.clean();
        self.sort_records();
        self.rebuild_trees();
    }

    /// Drop records marked cleared by `correct_dot_alleles`.
    pub fn clean(&mut self) {
        self.records.retain(|r| !r.is_cleared());
    }

    /// Resolve conflicting genotype calls between overlapping records, per
    /// SPEC_FULL.md §4.5.
    pub fn make_gt_compatible(&mut self) {
        let n = self.records.len();
        for i in 0..n {
            for j in (i + 1)..n {
                if !self.records[i].overlaps(&self.records[j]) {
                    continue;
                }
                let sample_count = self.samples.len();
                for s in 0..sample_count {
                    let gt_i = self.records[i].sample_infos.get(s).and_then(|si| si.gt());
                    let gt_j = self.records[j].sample_infos.get(s).and_then(|si| si.gt());
                    let (Some(gi), Some(gj)) = (gt_i, gt_j) else {
                        continue;
                    };
                    if gi == 0 && gj == 0 {
                        continue;
                    }
                    let lik_i = self.records[i].sample_infos[s].likelihoods().get(gi as usize).copied();
                    let lik_j = self.records[j].sample_infos[s].likelihoods().get(gj as usize).copied();
                    // A ref-call on the loser is only meaningful when both
                    // records share the same REF -- otherwise "0" denotes
                    // different bases at the two sites and no-call is safer.
                    let same_ref = self.records[i].reference == self.records[j].reference;
                    match (lik_i, lik_j) {
                        (Some(li), Some(lj)) => {
                            if li >= lj {
                                self.records[j].sample_infos[s]
                                    .set_gt(if same_ref { Some(0) } else { None });
                            } else {
                                self.records[i].sample_infos[s]
                                    .set_gt(if same_ref { Some(0) } else { None });
                            }
                        }
                        _ => {
                            self.records[i].sample_infos[s].set_gt(None);
                            self.records[j].sample_infos[s].set_gt(None);
                        }
                    }
                }
            }
        }
        self.rebuild_trees();
    }

    /// The Poisson-allele-coverage genotyping pipeline: per-allele
    /// likelihood, confidence, then the final genotype call.
    pub fn genotype(
        &mut self,
        expected_depth_covg: f64,
        error_rate: f64,
        min_allele_covg: u32,
        min_fraction: f64,
        min_total: u32,
        min_diff: f64,
        confidence_threshold: f64,
        snps_only: bool,
    ) {
        for record in &mut self.records {
            if snps_only && !record.is_snp() {
                continue;
            }
            genotype_record(
                record,
                expected_depth_covg,
                error_rate,
                min_allele_covg,
                min_fraction,
                min_total,
                min_diff,
                confidence_threshold,
            );
        }
        self.make_gt_compatible();
    }

    pub fn save<P: AsRef<FsPath>>(&mut self, path: P) -> Result<(), PandoraError> {
        self.sort_records();
        let path = path.as_ref();
        let mut writer = std::fs::File::create(path)
            .map(std::io::BufWriter::new)
            .map_err(|e| PandoraError::io(path, e))?;

        writeln!(writer, "##fileformat=VCFv4.3").map_err(|e| PandoraError::io(path, e))?;
        let mut contigs: Vec<&str> = self.records.iter().map(|r| r.chrom.as_str()).collect();
        contigs.sort_unstable();
        contigs.dedup();
        for contig in contigs {
            writeln!(writer, "##contig=<ID={contig}>").map_err(|e| PandoraError::io(path, e))?;
        }
        let mut format_keys: Vec<&String> = self
            .records
            .iter()
            .flat_map(|r| r.format_keys.iter())
            .collect();
        format_keys.sort_unstable();
        format_keys.dedup();
        for key in format_keys {
            writeln!(writer, "##FORMAT=<ID={key}>").map_err(|e| PandoraError::io(path, e))?;
        }
        let mut info_keys: Vec<&String> = self.records.iter().flat_map(|r| r.info.keys()).collect();
        info_keys.sort_unstable();
        info_keys.dedup();
        for key in info_keys {
            writeln!(writer, "##INFO=<ID={key}>").map_err(|e| PandoraError::io(path, e))?;
        }

        let mut header = vec![
            "#CHROM".to_string(),
            "POS".to_string(),
            "ID".to_string(),
            "REF".to_string(),
            "ALT".to_string(),
            "QUAL".to_string(),
            "FILTER".to_string(),
            "INFO".to_string(),
            "FORMAT".to_string(),
        ];
        header.extend(self.samples.iter().cloned());
        writeln!(writer, "{}", header.join("\t")).map_err(|e| PandoraError::io(path, e))?;

        for record in &self.records {
            writeln!(writer, "{}", record.to_line()).map_err(|e| PandoraError::io(path, e))?;
        }
        Ok(())
    }

    pub fn load<P: AsRef<FsPath>>(path: P) -> Result<Self, PandoraError> {
        let path_ref = path.as_ref();
        let file = std::fs::File::open(path_ref).map_err(|e| PandoraError::io(path_ref, e))?;
        let reader = std::io::BufReader::new(file);

        let mut samples = Vec::new();
        let mut records = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| PandoraError::io(path_ref, e))?;
            if line.is_empty() {
                continue;
            }
            if let Some(header) = line.strip_prefix("#CHROM") {
                let cols: Vec<&str> = header.split('\t').skip(9).collect();
                samples = cols.into_iter().map(str::to_string).collect();
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            let record = VCFRecord::parse_line(&line).map_err(|e| PandoraError::MalformedIndex {
                path: path_ref.to_path_buf(),
                line: lineno,
                detail: e.to_string(),
            })?;
            records.push(record);
        }

        let mut vcf = VCF { samples, records, trees: HashMap::new() };
        for record in &mut vcf.records {
            record.ensure_sample_count(vcf.samples.len());
        }
        vcf.rebuild_trees();
        Ok(vcf)
    }
}

/// Per-allele Poisson log-likelihood from per-allele supporting coverage
/// stored under the `COVG` sample field, the same model `KmerGraph::prob`
/// uses for node coverage.
fn genotype_record(
    record: &mut VCFRecord,
    expected_depth_covg: f64,
    error_rate: f64,
    min_allele_covg: u32,
    min_fraction: f64,
    min_total: u32,
    min_diff: f64,
    confidence_threshold: f64,
) {
    if !record.format_keys.iter().any(|k| k == "COVG") {
        return;
    }
    for sample in &mut record.sample_infos {
        let covgs: Vec<i64> = sample.get_ints("COVG").to_vec();
        if covgs.is_empty() {
            continue;
        }
        let total: i64 = covgs.iter().sum();
        let max_covg = covgs.iter().copied().max().unwrap_or(0);
        if total < min_allele_covg as i64 || (max_covg as f64) < min_fraction * total as f64 {
            continue;
        }

        let lambda_true = expected_depth_covg.max(1e-9);
        let lambda_error = (expected_depth_covg * error_rate).max(1e-9);
        let likelihoods: Vec<f64> = covgs
            .iter()
            .enumerate()
            .map(|(allele_idx, &c)| {
                let c = c as f64;
                let support = log_poisson_pmf(c, lambda_true);
                let against: f64 = covgs
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != allele_idx)
                    .map(|(_, &o)| log_poisson_pmf(o as f64, lambda_error))
                    .sum();
                support + against
            })
            .collect();
        sample.set_likelihoods(likelihoods.clone());

        if total < min_total as i64 {
            continue;
        }
        let mut sorted = likelihoods.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        let diff = if sorted.len() >= 2 { sorted[0] - sorted[1] } else { sorted[0] };
        if diff < min_diff {
            continue;
        }
        sample.set_gt_conf(diff);

        if diff >= confidence_threshold {
            let best = likelihoods
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(idx, _)| idx as i64);
            sample.set_gt(best);
        }
    }
}

fn ln_factorial(k: f64) -> f64 {
    if k < 2.0 {
        return 0.0;
    }
    k * k.ln() - k + 0.5 * (2.0 * std::f64::consts::PI * k).ln() + 1.0 / (12.0 * k)
}

fn log_poisson_pmf(k: f64, lambda: f64) -> f64 {
    k * lambda.ln() - lambda - ln_factorial(k)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merge_multi_allelic_combines_shared_site() {
        // SPEC_FULL.md §8 scenario 2.
        let mut vcf = VCF::new(vec!["s".to_string()]);
        let mut r1 = VCFRecord::new("chr1", 99, "A", vec!["C".to_string()]);
        r1.sample_infos.push(SampleInfo::new());
        r1.sample_infos[0].set_gt(Some(1));
        let mut r2 = VCFRecord::new("chr1", 99, "A", vec!["G".to_string()]);
        r2.sample_infos.push(SampleInfo::new());
        r2.sample_infos[0].set_gt(Some(1));
        vcf.records.push(r1);
        vcf.records.push(r2);

        vcf.merge_multi_allelic(10).unwrap();

        assert_eq!(vcf.records.len(), 1);
        assert_eq!(vcf.records[0].alts, vec!["C", "G"]);
        assert_eq!(vcf.records[0].sample_infos[0].gt(), Some(2));
    }

    #[test]
    fn add_sample_gt_appends_too_many_alts_record() {
        // SPEC_FULL.md §8 scenario 3.
        let mut vcf = VCF::new(vec!["s".to_string()]);
        vcf.add_sample_gt("s", "chr1", 49, "", "T");

        assert_eq!(vcf.records.len(), 1);
        let record = &vcf.records[0];
        assert_eq!(record.info.get("SVTYPE").map(String::as_str), Some("COMPLEX"));
        assert_eq!(record.info.get("GRAPHTYPE").map(String::as_str), Some("TOO_MANY_ALTS"));
        assert_eq!(record.sample_infos[0].gt(), Some(1));
    }

    #[test]
    fn correct_dot_alleles_prepends_prior_base() {
        // SPEC_FULL.md §8 scenario 4.
        let mut vcf = VCF::new(vec!["s".to_string()]);
        vcf.records.push(VCFRecord::new("chr1", 3, ".", vec!["T".to_string()]));
        vcf.rebuild_trees();

        vcf.correct_dot_alleles(b"NNNACGTNNN", "chr1");

        assert_eq!(vcf.records.len(), 1);
        assert_eq!(vcf.records[0].pos, 2);
        assert_eq!(vcf.records[0].reference, "N");
        assert_eq!(vcf.records[0].alts, vec!["NT"]);
    }

    #[test]
    fn make_gt_compatible_keeps_higher_likelihood_call() {
        // SPEC_FULL.md §8 scenario 5.
        let mut vcf = VCF::new(vec!["s".to_string()]);
        let mut r1 = VCFRecord::new("chr1", 9, "AAA", vec!["CCC".to_string()]);
        r1.sample_infos.push(SampleInfo::new());
        r1.sample_infos[0].set_gt(Some(1));
        r1.sample_infos[0].set_likelihoods(vec![-5.0, -1.0]);

        let mut r2 = VCFRecord::new("chr1", 10, "A", vec!["G".to_string()]);
        r2.sample_infos.push(SampleInfo::new());
        r2.sample_infos[0].set_gt(Some(1));
        r2.sample_infos[0].set_likelihoods(vec![-2.0, -3.0]);

        vcf.records.push(r1);
        vcf.records.push(r2);
        vcf.rebuild_trees();

        vcf.make_gt_compatible();

        assert_eq!(vcf.records[0].sample_infos[0].gt(), Some(1));
        assert_eq!(vcf.records[1].sample_infos[0].gt(), None);
    }

    #[test]
    fn add_record_extends_unknown_samples_across_all_records() {
        let mut vcf = VCF::new(vec!["a".to_string()]);
        vcf.records.push(VCFRecord::new("chr1", 0, "A", vec!["C".to_string()]));
        vcf.records[0].ensure_sample_count(1);
        vcf.rebuild_trees();

        let new_record = VCFRecord::new("chr1", 5, "G", vec!["T".to_string()]);
        vcf.add_record(new_record, &["b".to_string()]);

        assert_eq!(vcf.samples, vec!["a", "b"]);
        for record in &vcf.records {
            assert_eq!(record.sample_infos.len(), 2);
        }
    }

    #[test]
    fn save_load_round_trips() {
        let mut vcf = VCF::new(vec!["s".to_string()]);
        let mut r = VCFRecord::new("chr1", 4, "A", vec!["C".to_string()]);
        r.sample_infos.push(SampleInfo::new());
        r.sample_infos[0].set_gt(Some(1));
        vcf.records.push(r);
        vcf.rebuild_trees();

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.vcf");
        vcf.save(&file).unwrap();
        let loaded = VCF::load(&file).unwrap();

        assert_eq!(loaded.samples, vcf.samples);
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].pos, 4);
        assert_eq!(loaded.records[0].sample_infos[0].gt(), Some(1));
    }
}
