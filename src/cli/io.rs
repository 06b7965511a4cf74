use crate::blue::sequence::Sequence;
use anyhow::{anyhow, bail, Context, Result};
use needletail::{parse_fastx_file, FastxReader};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Bases per line when writing FASTA.
const FASTA_LINE: usize = 60;
/// Highest canonical quality kept after stripping the FASTQ offset.
const MAX_QUAL: u8 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFormat {
    Fasta,
    Fastq,
}

impl ReadFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReadFormat::Fasta => "fasta",
            ReadFormat::Fastq => "fastq",
        }
    }
}

/// One input read, qualities already on the canonical scale.
#[derive(Debug, Clone, Default)]
pub struct ReadRecord {
    pub id: String,
    pub seq: Sequence,
}

/* ------------------------------------------------------------------------- */
/*  Input                                                                    */
/* ------------------------------------------------------------------------- */

/// Detect FASTA vs FASTQ from the first byte of the first record.
pub fn detect_format(path: &Path) -> Result<ReadFormat> {
    let file = File::open(path).context(format!("opening {:?}", path))?;
    let mut reader = BufReader::new(file);
    let mut first = [0u8; 1];
    use std::io::Read;
    reader
        .read_exact(&mut first)
        .context(format!("empty reads file {:?}", path))?;
    match first[0] {
        b'>' => Ok(ReadFormat::Fasta),
        b'@' => Ok(ReadFormat::Fastq),
        other => bail!("{:?} is neither FASTA nor FASTQ (starts with {:?})", path, other as char),
    }
}

/// Resolve the FASTQ quality offset (33 or 64) from the byte distribution
/// of the first records: Phred+33 files always contain bytes below '@'.
pub fn detect_qual_offset(path: &Path) -> Result<u8> {
    let mut reader = parse_fastx_file(path).context(format!("opening {:?}", path))?;
    let mut min_byte = u8::MAX;
    let mut seen = 0;
    while let Some(rec) = reader.next() {
        let rec = rec.map_err(|e| anyhow!("parsing {:?}: {e}", path))?;
        if let Some(qual) = rec.qual() {
            for &q in qual {
                min_byte = min_byte.min(q);
            }
        }
        seen += 1;
        if seen >= 1000 {
            break;
        }
    }
    Ok(if min_byte < 64 { 33 } else { 64 })
}

/// Streaming reader over one reads file, with the optional `.qual`
/// companion for FASTA inputs.
pub struct ReadSource {
    reader: Box<dyn FastxReader>,
    quals: Option<QualReader>,
    qual_offset: u8,
    pub format: ReadFormat,
    pub path: PathBuf,
}

impl ReadSource {
    pub fn open(path: &Path, format: ReadFormat) -> Result<Self> {
        let qual_offset = match format {
            ReadFormat::Fastq => detect_qual_offset(path)?,
            ReadFormat::Fasta => 0,
        };
        let quals = match format {
            ReadFormat::Fasta => QualReader::open_for(path)?,
            ReadFormat::Fastq => None,
        };
        let reader = parse_fastx_file(path).context(format!("opening {:?}", path))?;
        Ok(ReadSource {
            reader,
            quals,
            qual_offset,
            format,
            path: path.to_path_buf(),
        })
    }

    pub fn qual_offset(&self) -> u8 {
        self.qual_offset
    }

    pub fn has_qual_companion(&self) -> bool {
        self.quals.is_some()
    }

    /// Pull the next read; `None` at end of file. Malformed records come
    /// back as `Err` so the caller can count and skip them.
    pub fn next_read(&mut self) -> Option<Result<ReadRecord>> {
        let rec = match self.reader.next()? {
            Ok(r) => r,
            Err(e) => return Some(Err(anyhow!("parsing {:?}: {e}", self.path))),
        };
        let id = String::from_utf8_lossy(rec.id()).into_owned();
        let bases = rec.seq();
        let seq = match rec.qual() {
            Some(raw) => {
                let quals: Vec<u8> = raw
                    .iter()
                    .map(|&q| q.saturating_sub(self.qual_offset).min(MAX_QUAL))
                    .collect();
                Sequence::with_quals(&bases, &quals)
            }
            None => match &mut self.quals {
                Some(qr) => match qr.next_quals() {
                    Some(Ok(quals)) if quals.len() == bases.len() => {
                        Sequence::with_quals(&bases, &quals)
                    }
                    Some(Ok(_)) => {
                        return Some(Err(anyhow!(
                            "qual record length mismatch for {id} in {:?}",
                            self.path
                        )))
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => Sequence::from_bases(&bases),
                },
                None => Sequence::from_bases(&bases),
            },
        };
        Some(Ok(ReadRecord { id, seq }))
    }
}

/// Reader for the `.qual` companion of a FASTA file: `>id` headers followed
/// by comma- (or whitespace-) separated integers.
pub struct QualReader {
    lines: Lines<BufReader<File>>,
    pending: Option<String>,
}

impl QualReader {
    /// Look for `<stem>.qual` next to the FASTA file, then `<file>.qual`.
    pub fn open_for(fasta: &Path) -> Result<Option<Self>> {
        let mut candidates = vec![fasta.with_extension("qual")];
        let mut appended = fasta.as_os_str().to_owned();
        appended.push(".qual");
        candidates.push(PathBuf::from(appended));
        for cand in candidates {
            if cand.exists() {
                let file = File::open(&cand).context(format!("opening qual file {:?}", cand))?;
                return Ok(Some(QualReader {
                    lines: BufReader::new(file).lines(),
                    pending: None,
                }));
            }
        }
        Ok(None)
    }

    pub fn next_quals(&mut self) -> Option<Result<Vec<u8>>> {
        // find the record header
        loop {
            let line = match self.pending.take() {
                Some(l) => l,
                None => match self.lines.next()? {
                    Ok(l) => l,
                    Err(e) => return Some(Err(e.into())),
                },
            };
            if line.starts_with('>') {
                break;
            }
        }
        // accumulate value lines until the next header
        let mut quals = Vec::new();
        loop {
            match self.lines.next() {
                None => break,
                Some(Err(e)) => return Some(Err(e.into())),
                Some(Ok(line)) => {
                    if line.starts_with('>') {
                        self.pending = Some(line);
                        break;
                    }
                    for tok in line.split(|c: char| c == ',' || c.is_whitespace()) {
                        if tok.is_empty() {
                            continue;
                        }
                        match tok.parse::<u16>() {
                            Ok(v) => quals.push(v.min(MAX_QUAL as u16) as u8),
                            Err(_) => return Some(Err(anyhow!("bad qual value {tok:?}"))),
                        }
                    }
                }
            }
        }
        Some(Ok(quals))
    }
}

/* ------------------------------------------------------------------------- */
/*  Output                                                                   */
/* ------------------------------------------------------------------------- */

/// Buffered writer for one output stream. A failed flush is retried once
/// after a short delay; a second failure downgrades this output (writes
/// become no-ops) rather than killing the run.
pub struct ReadWriter {
    writer: BufWriter<File>,
    qual_writer: Option<BufWriter<File>>,
    format: ReadFormat,
    qual_offset: u8,
    degraded: bool,
    pub written: u64,
    path: PathBuf,
}

impl ReadWriter {
    pub fn create(
        path: &Path,
        format: ReadFormat,
        qual_offset: u8,
        with_qual_file: bool,
    ) -> Result<Self> {
        let writer = BufWriter::new(
            File::create(path).context(format!("creating output {:?}", path))?,
        );
        let qual_writer = if with_qual_file && format == ReadFormat::Fasta {
            let qual_path = path.with_extension("qual");
            Some(BufWriter::new(File::create(&qual_path).context(format!(
                "creating qual output {:?}",
                qual_path
            ))?))
        } else {
            None
        };
        Ok(ReadWriter {
            writer,
            qual_writer,
            format,
            qual_offset: if qual_offset == 0 { 33 } else { qual_offset },
            degraded: false,
            written: 0,
            path: path.to_path_buf(),
        })
    }

    pub fn write_read(&mut self, rec: &ReadRecord) {
        if self.degraded {
            return;
        }
        if let Err(first) = self.write_once(rec) {
            thread::sleep(Duration::from_millis(100));
            if let Err(second) = self.write_once(rec) {
                eprintln!(
                    "write to {:?} failing ({first}; retry: {second}); output downgraded",
                    self.path
                );
                self.degraded = true;
                return;
            }
        }
        self.written += 1;
    }

    fn write_once(&mut self, rec: &ReadRecord) -> std::io::Result<()> {
        match self.format {
            ReadFormat::Fasta => {
                writeln!(self.writer, ">{}", rec.id)?;
                for chunk in rec.seq.bases().chunks(FASTA_LINE) {
                    self.writer.write_all(chunk)?;
                    self.writer.write_all(b"\n")?;
                }
                if let Some(qw) = &mut self.qual_writer {
                    writeln!(qw, ">{}", rec.id)?;
                    let mut line = String::new();
                    for (i, q) in rec.seq.quals().iter().enumerate() {
                        if i > 0 {
                            line.push(',');
                        }
                        line.push_str(&q.to_string());
                    }
                    writeln!(qw, "{line}")?;
                }
            }
            ReadFormat::Fastq => {
                writeln!(self.writer, "@{}", rec.id)?;
                self.writer.write_all(rec.seq.bases())?;
                self.writer.write_all(b"\n+\n")?;
                if rec.seq.has_quals() {
                    for &q in rec.seq.quals() {
                        self.writer.write_all(&[q + self.qual_offset])?;
                    }
                } else {
                    // no qualities survived; emit a flat placeholder track
                    for _ in 0..rec.seq.len() {
                        self.writer.write_all(&[self.qual_offset + 20])?;
                    }
                }
                self.writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.writer.flush().context("flushing output")?;
        if let Some(qw) = &mut self.qual_writer {
            qw.flush().context("flushing qual output")?;
        }
        Ok(())
    }
}

/// `<stem>_<run><suffix>.<ext>`, placed in `out_dir` when given, else next
/// to the input.
pub fn output_path(
    input: &Path,
    run_name: &str,
    suffix: &str,
    format: ReadFormat,
    out_dir: Option<&Path>,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "reads".to_string());
    let name = format!("{stem}_{run_name}{suffix}.{}", format.extension());
    match out_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Expand the positional reads arguments, which may be plain paths or glob
/// patterns.
pub fn expand_read_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pat in patterns {
        let direct = Path::new(pat);
        if direct.exists() {
            files.push(direct.to_path_buf());
            continue;
        }
        let mut matched = false;
        for entry in glob::glob(pat).context(format!("bad reads pattern {pat:?}"))? {
            files.push(entry.context("reading glob match")?);
            matched = true;
        }
        if !matched {
            bail!("reads pattern {pat:?} matched no files");
        }
    }
    Ok(files)
}
