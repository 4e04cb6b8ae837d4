// Codebooks map a code (one channel symbol per round) to a target gene.
//
// Two on-disk forms are read:
//   - SpaceTx-style JSON, where each codeword lists its non-zero
//     {"r": round, "c": channel, "v": value} entries,
//   - CSV with `target` and `code` columns, codes spelled over an alphabet
//     whose i-th character stands for channel i (e.g. "TGCA" for ISS).

use flate2::read::GzDecoder;
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

use crate::error::{IssError, Result};
use crate::input::find_column;

/// Selected channel for each round, in round order.
pub type Code = Vec<u8>;

pub type TargetIndex = u32;

/// Codes store channels as `u8`.
pub const MAX_CHANNELS: usize = u8::MAX as usize + 1;

#[derive(Clone, Debug)]
pub struct Codebook {
    nrounds: usize,
    nchannels: usize,
    targets: Vec<String>,
    codes: Vec<Code>,
    index: HashMap<Code, TargetIndex>,
}

impl Codebook {
    /// An empty codebook expecting codes of length `nrounds` over `nchannels`
    /// symbols. At most `MAX_CHANNELS` channels are supported.
    pub fn new(nrounds: usize, nchannels: usize) -> Result<Self> {
        if nchannels > MAX_CHANNELS {
            return Err(IssError::InvalidCodebook(format!(
                "{} channels exceeds the supported {}",
                nchannels, MAX_CHANNELS
            )));
        }

        Ok(Codebook {
            nrounds,
            nchannels,
            targets: Vec::new(),
            codes: Vec::new(),
            index: HashMap::new(),
        })
    }

    /// Add a codeword, returning its target index.
    pub fn add(&mut self, code: Code, target: impl Into<String>) -> Result<TargetIndex> {
        let target = target.into();

        if code.len() != self.nrounds {
            return Err(IssError::InvalidCodeword {
                target,
                reason: format!("code has {} rounds, expected {}", code.len(), self.nrounds),
            });
        }

        if let Some(&symbol) = code.iter().find(|&&s| s as usize >= self.nchannels) {
            return Err(IssError::InvalidCodeword {
                target,
                reason: format!("channel {} exceeds the {} channels", symbol, self.nchannels),
            });
        }

        if let Some(&existing) = self.index.get(&code) {
            return Err(IssError::DuplicateCode {
                code: code_string(&code, self.nchannels),
                first: self.targets[existing as usize].clone(),
                second: target,
            });
        }

        let i = self.targets.len() as TargetIndex;
        self.index.insert(code.clone(), i);
        self.codes.push(code);
        self.targets.push(target);
        Ok(i)
    }

    /// Build from `(target, code)` pairs with codes spelled over `alphabet`.
    pub fn from_code_strings<I, S, T>(alphabet: &str, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (T, S)>,
        S: AsRef<str>,
        T: Into<String>,
    {
        let symbols: Vec<char> = alphabet.chars().collect();
        if symbols.is_empty() || symbols.len() > MAX_CHANNELS {
            return Err(IssError::InvalidCodebook(format!(
                "alphabet '{}' must have between 1 and {} symbols",
                alphabet, MAX_CHANNELS
            )));
        }

        let mut codebook: Option<Codebook> = None;
        for (target, code) in entries {
            let target = target.into();
            let code = code.as_ref();

            let mut parsed = Code::with_capacity(code.len());
            for ch in code.chars() {
                match symbols.iter().position(|&s| s == ch) {
                    Some(pos) => parsed.push(pos as u8),
                    None => {
                        return Err(IssError::InvalidCodeword {
                            target,
                            reason: format!("symbol '{}' is not in alphabet '{}'", ch, alphabet),
                        })
                    }
                }
            }

            if codebook.is_none() {
                codebook = Some(Codebook::new(parsed.len(), symbols.len())?);
            }
            if let Some(codebook) = codebook.as_mut() {
                codebook.add(parsed, target)?;
            }
        }

        codebook.ok_or_else(|| IssError::InvalidCodebook("no codewords".to_string()))
    }

    /// Parse a SpaceTx-style JSON codebook.
    pub fn parse_json(content: &str) -> Result<Self> {
        let data = json::parse(content)?;
        if let Some(version) = data["version"].as_str() {
            debug!("Codebook format version {}", version);
        }

        let mappings = &data["mappings"];
        if !mappings.is_array() {
            return Err(IssError::InvalidCodebook(
                "expected a 'mappings' array".to_string(),
            ));
        }

        let mut codewords: Vec<(String, Vec<(usize, usize)>)> = Vec::with_capacity(mappings.len());
        let mut mapping_entry_counts = Vec::with_capacity(mappings.len());
        let mut nrounds = 0;
        let mut nchannels = 0;

        for mapping in mappings.members() {
            let target = mapping["target"]
                .as_str()
                .ok_or_else(|| IssError::InvalidCodebook("mapping without a 'target'".to_string()))?
                .to_string();

            if !mapping["codeword"].is_array() {
                return Err(IssError::InvalidCodeword {
                    target,
                    reason: "missing 'codeword' array".to_string(),
                });
            }

            mapping_entry_counts.push(mapping["codeword"].len());
            let mut entries = Vec::new();
            for entry in mapping["codeword"].members() {
                let (Some(r), Some(c)) = (entry["r"].as_usize(), entry["c"].as_usize()) else {
                    return Err(IssError::InvalidCodeword {
                        target,
                        reason: "codeword entry needs integer 'r' and 'c'".to_string(),
                    });
                };
                let v = entry["v"].as_f64().unwrap_or(1.0);

                nrounds = nrounds.max(r.saturating_add(1));
                nchannels = nchannels.max(c.saturating_add(1));
                if v != 0.0 {
                    entries.push((r, c));
                }
            }
            codewords.push((target, entries));
        }

        if codewords.is_empty() {
            return Err(IssError::InvalidCodebook("no codewords".to_string()));
        }
        // Every round of every codeword needs its own entry, so more rounds
        // than the longest codeword has entries can never be valid.
        let max_entries = mapping_entry_counts.into_iter().max().unwrap_or(0);
        if nrounds > max_entries {
            return Err(IssError::InvalidCodebook(format!(
                "round {} is referenced but no codeword has more than {} entries",
                nrounds - 1,
                max_entries
            )));
        }

        let mut codebook = Codebook::new(nrounds, nchannels)?;
        for (target, entries) in codewords {
            let mut code: Vec<Option<u8>> = vec![None; nrounds];
            for (r, c) in entries {
                if code[r].replace(c as u8).is_some() {
                    return Err(IssError::InvalidCodeword {
                        target,
                        reason: format!("round {} has more than one channel", r),
                    });
                }
            }

            if let Some(r) = code.iter().position(|c| c.is_none()) {
                return Err(IssError::InvalidCodeword {
                    target,
                    reason: format!("round {} has no channel", r),
                });
            }

            codebook.add(code.into_iter().flatten().collect(), target)?;
        }

        Ok(codebook)
    }

    /// Read a JSON codebook (optionally gzipped).
    pub fn read_json(path: &str) -> Result<Self> {
        let mut content = String::new();
        let mut file = File::open(path)?;
        if path.ends_with(".gz") {
            GzDecoder::new(file).read_to_string(&mut content)?;
        } else {
            file.read_to_string(&mut content)?;
        }

        let codebook = Codebook::parse_json(&content)?;
        info!(
            "Read codebook with {} codewords ({} rounds x {} channels) from {}",
            codebook.len(),
            codebook.nrounds(),
            codebook.nchannels(),
            path
        );
        Ok(codebook)
    }

    /// Read a CSV codebook (optionally gzipped) with `target` and `code` columns.
    pub fn read_csv(path: &str, alphabet: &str) -> Result<Self> {
        let file = File::open(path)?;
        let codebook = if path.ends_with(".gz") {
            read_codebook_csv(&mut csv::Reader::from_reader(GzDecoder::new(file)), alphabet)?
        } else {
            read_codebook_csv(&mut csv::Reader::from_reader(file), alphabet)?
        };

        info!(
            "Read codebook with {} codewords ({} rounds x {} channels) from {}",
            codebook.len(),
            codebook.nrounds(),
            codebook.nchannels(),
            path
        );
        Ok(codebook)
    }

    /// Read a codebook, choosing the format from the file name.
    pub fn read(path: &str, alphabet: &str) -> Result<Self> {
        if path.ends_with(".json") || path.ends_with(".json.gz") {
            Codebook::read_json(path)
        } else {
            Codebook::read_csv(path, alphabet)
        }
    }

    pub fn lookup(&self, code: &[u8]) -> Option<&str> {
        self.lookup_index(code)
            .map(|i| self.targets[i as usize].as_str())
    }

    pub fn lookup_index(&self, code: &[u8]) -> Option<TargetIndex> {
        self.index.get(code).copied()
    }

    pub fn nrounds(&self) -> usize {
        self.nrounds
    }

    pub fn nchannels(&self) -> usize {
        self.nchannels
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &str)> + '_ {
        self.codes
            .iter()
            .zip(&self.targets)
            .map(|(code, target)| (code.as_slice(), target.as_str()))
    }
}

fn read_codebook_csv<T>(rdr: &mut csv::Reader<T>, alphabet: &str) -> Result<Codebook>
where
    T: std::io::Read,
{
    let headers = rdr.headers()?;
    let target_col = find_column(headers, "target")?;
    let code_col = find_column(headers, "code")?;

    let mut entries = Vec::new();
    for result in rdr.records() {
        let row = result?;
        entries.push((row[target_col].to_string(), row[code_col].trim().to_string()));
    }

    Codebook::from_code_strings(alphabet, entries)
}

/// Render a code as one digit per round, or dot-separated channel numbers
/// when there are more than ten channels.
pub fn code_string(code: &[u8], nchannels: usize) -> String {
    if nchannels <= 10 {
        code.iter().map(|c| char::from(b'0' + c)).collect()
    } else {
        code.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(".")
    }
}
