use config::{Strand, SOURCE};
use hashbrown::HashMap;

use crate::bins::Transcript;

const GTF_FIELDS: usize = 9;

fn attributes(tx: &Transcript) -> String {
    let mut attrs = format!("gene_id \"{}\"; transcript_id \"{}\";", tx.gene_id, tx.id);

    if let Some(frac) = tx.frequency {
        attrs.push_str(&format!(" frac \"{:.6}\";", frac));
    }
    if let Some(lo) = tx.conf_lo {
        attrs.push_str(&format!(" conf_lo \"{:.2}\";", lo));
    }
    if let Some(hi) = tx.conf_hi {
        attrs.push_str(&format!(" conf_hi \"{:.2}\";", hi));
    }
    if tx.unobservable {
        attrs.push_str(" unobservable \"true\";");
    }
    if !tx.unidentifiable_with.is_empty() {
        attrs.push_str(&format!(
            " unidentifiable_with \"{}\";",
            tx.unidentifiable_with.join(",")
        ));
    }

    attrs
}

/// `transcript` line followed by its `exon` lines, exons numbered 5' to 3'
pub fn transcript_lines(tx: &Transcript) -> Vec<String> {
    let attrs = attributes(tx);
    let mut lines = Vec::with_capacity(tx.exons.len() + 1);

    lines.push(format!(
        "{}\t{}\ttranscript\t{}\t{}\t.\t{}\t.\t{}",
        tx.chrom,
        SOURCE,
        tx.start() + 1,
        tx.stop() + 1,
        tx.strand,
        attrs
    ));

    let n = tx.exons.len();
    for (idx, (start, stop)) in tx.exons.iter().enumerate() {
        let exon_number = match tx.strand {
            Strand::Forward => idx + 1,
            Strand::Reverse => n - idx,
        };

        lines.push(format!(
            "{}\t{}\texon\t{}\t{}\t.\t{}\t.\t{} exon_number \"{}\";",
            tx.chrom,
            SOURCE,
            start + 1,
            stop + 1,
            tx.strand,
            attrs,
            exon_number
        ));
    }

    lines
}

fn parse_attributes(field: &str) -> HashMap<&str, &str> {
    field
        .split(';')
        .filter_map(|attr| {
            let attr = attr.trim();
            let (key, value) = attr.split_once(' ')?;
            Some((key, value.trim().trim_matches('"')))
        })
        .collect()
}

/// reads back transcripts written by [`transcript_lines`]
pub fn parse_gtf(contents: &str) -> Result<Vec<Transcript>, &'static str> {
    let mut order: Vec<String> = Vec::new();
    let mut transcripts: HashMap<String, Transcript> = HashMap::new();

    for line in contents.lines().filter(|l| !l.starts_with('#') && !l.is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < GTF_FIELDS {
            return Err("Line has less than 9 fields");
        }

        let attrs = parse_attributes(fields[8]);
        let id = attrs.get("transcript_id").ok_or("Missing transcript_id")?;
        let start = fields[3].parse::<u64>().map_err(|_| "Cannot parse start")?;
        let end = fields[4].parse::<u64>().map_err(|_| "Cannot parse end")?;
        if start == 0 || end < start {
            return Err("ERROR: invalid GTF interval");
        }

        let parse_f64 = |key: &str| attrs.get(key).and_then(|v| v.parse::<f64>().ok());

        match fields[2] {
            "transcript" => {
                let tx = Transcript {
                    id: id.to_string(),
                    gene_id: attrs
                        .get("gene_id")
                        .ok_or("Missing gene_id")?
                        .to_string(),
                    chrom: fields[0].to_string(),
                    strand: fields[6]
                        .parse::<Strand>()
                        .map_err(|_| "ERROR: Strand is not + or -")?,
                    exons: Vec::new(),
                    promoter: None,
                    polya: None,
                    frequency: parse_f64("frac"),
                    conf_lo: parse_f64("conf_lo"),
                    conf_hi: parse_f64("conf_hi"),
                    unobservable: attrs.get("unobservable") == Some(&"true"),
                    unidentifiable_with: attrs
                        .get("unidentifiable_with")
                        .map(|v| v.split(',').map(String::from).collect())
                        .unwrap_or_default(),
                };
                order.push(tx.id.clone());
                transcripts.insert(tx.id.clone(), tx);
            }
            "exon" => {
                let tx = transcripts
                    .get_mut(*id)
                    .ok_or("Exon found before its transcript line")?;
                tx.exons.push((start - 1, end - 1));
            }
            _ => continue,
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|id| transcripts.remove(&id))
        .map(|mut tx| {
            tx.exons.sort_unstable();
            tx
        })
        .collect())
}
