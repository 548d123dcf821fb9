//! Streaming file encode, decode and repair
//!
//! Files are pushed through a [`Session`] one read-in at a time; each read-in
//! appends `planes · block_size` bytes to every unit file, so memory use is
//! bounded by the buffer size no matter how large the input is.
//!
//! Outputs are staged as temporary files in the coding directory and only
//! renamed into place once the whole operation has succeeded.

pub mod layout;
pub mod metadata;

pub use layout::{metadata_path_for, split_name, CodingLayout, CODING_DIR};
pub use metadata::{digest_hex, CodingMetadata};

use rand::RngCore;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::CodecConfig;
use crate::error::{Error, Result};
use crate::galois::FieldRegistry;
use crate::session::{Session, SessionSummary};
use crate::stripe::ErasureSet;

/// Outcome of an encode
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub layout: CodingLayout,
    pub metadata: CodingMetadata,
    pub summary: Option<SessionSummary>,
}

/// Outcome of a decode
#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub output: PathBuf,
    pub erasures: ErasureSet,
    pub metadata: CodingMetadata,
    pub summary: Option<SessionSummary>,
}

/// Outcome of a unit repair
#[derive(Debug, Clone)]
pub struct RepairReport {
    pub unit: usize,
    pub path: PathBuf,
    /// Surviving-unit bytes read to rebuild the unit
    pub bytes_read: u64,
    pub summary: Option<SessionSummary>,
}

/// Where encode input comes from
enum Source {
    File(BufReader<File>),
    Random(rand::rngs::ThreadRng),
}

impl Source {
    fn fill(&mut self, buffer: &mut [u8]) -> Result<()> {
        match self {
            Source::File(reader) => reader.read_exact(buffer)?,
            Source::Random(rng) => rng.fill_bytes(buffer),
        }
        Ok(())
    }
}

/// Encode `input` into k+m unit files in the `Coding` directory beside it
///
/// # Errors
/// Returns `Io` if the input cannot be read or the units cannot be written,
/// and setup errors for an invalid configuration.
pub fn encode_file(input: &Path, config: &CodecConfig, registry: &FieldRegistry) -> Result<EncodeReport> {
    let file = File::open(input)?;
    let size = file.metadata()?.len();
    info!("Encoding {} ({} bytes)", input.display(), size);
    encode_stream(Source::File(BufReader::new(file)), input, size, config, registry)
}

/// Encode `size` random bytes as if they were the file `target`
///
/// No input file is written and no hash is recorded, so a later decode
/// cannot be verified.
///
/// # Errors
/// Same as [`encode_file`].
pub fn encode_random(target: &Path, size: u64, config: &CodecConfig, registry: &FieldRegistry) -> Result<EncodeReport> {
    info!("Encoding {} random bytes as {}", size, target.display());
    encode_stream(Source::Random(rand::thread_rng()), target, size, config, registry)
}

fn encode_stream(
    mut source: Source,
    input: &Path,
    size: u64,
    config: &CodecConfig,
    registry: &FieldRegistry,
) -> Result<EncodeReport> {
    let layout = CodingLayout::for_input(input, config.k, config.m)?;
    let mut session = Session::new(config.clone(), size)?;
    session.build(registry)?;
    let geometry = *session.geometry();

    layout.create_dir()?;
    let mut staged = (0..layout.units())
        .map(|_| NamedTempFile::new_in(layout.dir()))
        .collect::<std::io::Result<Vec<_>>>()?;

    let hash = matches!(source, Source::File(_));
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; geometry.buffer_size];

    {
        let mut writers: Vec<_> = staged
            .iter_mut()
            .map(|file| BufWriter::new(file.as_file_mut()))
            .collect();
        for n in 0..geometry.readins {
            let chunk = &mut buffer[..geometry.readin_len(n)];
            source.fill(chunk)?;
            if hash {
                hasher.update(chunk);
            }
            let units = session.encode_readin(chunk)?;
            for (writer, unit) in writers.iter_mut().zip(&units) {
                writer.write_all(unit)?;
            }
        }
        for writer in &mut writers {
            writer.flush()?;
        }
    }

    let digest = hash.then(|| digest_hex(&hasher.finalize()));
    let metadata = CodingMetadata::new(file_name(input)?, config, &geometry, digest);
    for (unit, file) in staged.into_iter().enumerate() {
        persist(file, &layout.unit_path(unit))?;
    }
    metadata.save(layout.metadata_path())?;
    info!(
        "Wrote {} units of {} bytes to {}",
        layout.units(),
        metadata.unit_len(),
        layout.dir().display()
    );

    Ok(EncodeReport {
        layout,
        summary: session.summary(),
        metadata,
    })
}

/// Decode the units of `input` into `<stem>_decoded<ext>`
///
/// Missing or truncated units are treated as erased. When the metadata
/// carries a hash, the decoded file is checked against it.
///
/// # Errors
/// Returns `Config` if the metadata cannot be read, `SingularMatrix` if more
/// than m units are gone, and `IntegrityMismatch` if the output does not
/// match the recorded hash.
pub fn decode_file(input: &Path, registry: &FieldRegistry) -> Result<DecodeReport> {
    let (metadata, layout, erasures) = inspect(input)?;
    let mut session = Session::new(metadata.config(), metadata.original_size)?;
    session.set_erasures(erasures.clone())?;
    session.build(registry)?;
    let geometry = *session.geometry();

    let mut readers = open_survivors(&layout, &erasures)?;
    let mut blocks = vec![vec![0u8; geometry.unit_len()]; layout.units()];
    let output = layout.decoded_path();
    let mut staged = NamedTempFile::new_in(layout.dir())?;
    let mut writer = BufWriter::new(staged.as_file_mut());
    let mut hasher = blake3::Hasher::new();

    for _ in 0..geometry.readins {
        for (reader, block) in readers.iter_mut().zip(blocks.iter_mut()) {
            if let Some(reader) = reader {
                reader.read_exact(block)?;
            }
        }
        let present = present_units(&readers, &blocks);
        let data = session.decode_readin(&present)?;
        hasher.update(&data);
        writer.write_all(&data)?;
    }
    writer.flush()?;
    drop(writer);

    metadata.verify(&hasher.finalize())?;
    persist(staged, &output)?;
    info!("Decoded {} to {}", metadata.file_name, output.display());

    Ok(DecodeReport {
        output,
        erasures,
        summary: session.summary(),
        metadata,
    })
}

/// Rebuild unit `unit` of `input` in place
///
/// When it is the only damaged unit, just the repair planes of the other
/// units are read. Otherwise every missing unit is reconstructed and only
/// `unit` is written back.
///
/// # Errors
/// Returns `InvalidErasure` for an out of range unit, plus the errors of
/// [`decode_file`].
pub fn repair_unit(input: &Path, unit: usize, registry: &FieldRegistry) -> Result<RepairReport> {
    let (metadata, layout, damaged) = inspect(input)?;
    let erasures = ErasureSet::new(damaged.iter().chain([unit]), layout.units())?;

    let mut session = Session::new(metadata.config(), metadata.original_size)?;
    session.set_erasures(erasures.clone())?;
    session.build(registry)?;

    let path = layout.unit_path(unit);
    let mut staged = NamedTempFile::new_in(layout.dir())?;
    let bytes_read = if erasures.len() == 1 {
        repair_single(&mut session, &layout, unit, staged.as_file_mut())?
    } else {
        info!(
            "Units {:?} are also damaged, rebuilding unit {} from a full decode",
            damaged.as_slice(),
            unit
        );
        repair_by_restore(&mut session, &layout, &erasures, unit, staged.as_file_mut())?
    };
    persist(staged, &path)?;
    info!("Repaired {} reading {} bytes", path.display(), bytes_read);

    Ok(RepairReport {
        unit,
        path,
        bytes_read,
        summary: session.summary(),
    })
}

/// Load the metadata of `input` and find its damaged units
///
/// # Errors
/// Returns `Config` if the metadata is missing or unreadable.
pub fn inspect(input: &Path) -> Result<(CodingMetadata, CodingLayout, ErasureSet)> {
    let metadata = CodingMetadata::load(metadata_path_for(input)?)?;
    let layout = CodingLayout::for_input(input, metadata.k, metadata.m)?;
    let erasures = layout.scan_erasures(metadata.unit_len())?;
    Ok((metadata, layout, erasures))
}

fn repair_single(session: &mut Session, layout: &CodingLayout, unit: usize, out: &mut File) -> Result<u64> {
    let geometry = *session.geometry();
    let planes = session.repair_planes()?;
    let block_size = geometry.block_size;
    let unit_len = geometry.unit_len();
    debug!("Repair of unit {} reads planes {:?}", unit, planes);

    let mut files = (0..layout.units())
        .map(|u| {
            if u == unit {
                Ok(None)
            } else {
                File::open(layout.unit_path(u)).map(Some)
            }
        })
        .collect::<std::io::Result<Vec<_>>>()?;

    let mut blocks = vec![vec![0u8; unit_len]; layout.units()];
    let mut writer = BufWriter::new(out);
    let mut bytes_read = 0u64;

    for n in 0..geometry.readins {
        let base = (n * unit_len) as u64;
        for (file, block) in files.iter_mut().zip(blocks.iter_mut()) {
            if let Some(file) = file {
                for &plane in &planes {
                    file.seek(SeekFrom::Start(base + (plane * block_size) as u64))?;
                    file.read_exact(&mut block[plane * block_size..(plane + 1) * block_size])?;
                    bytes_read += block_size as u64;
                }
            }
        }
        let present: Vec<Option<&[u8]>> = files
            .iter()
            .zip(&blocks)
            .map(|(file, block)| file.as_ref().map(|_| block.as_slice()))
            .collect();
        writer.write_all(&session.repair_readin(&present)?)?;
    }
    writer.flush()?;
    Ok(bytes_read)
}

fn repair_by_restore(
    session: &mut Session,
    layout: &CodingLayout,
    erasures: &ErasureSet,
    unit: usize,
    out: &mut File,
) -> Result<u64> {
    let geometry = *session.geometry();
    let mut readers = open_survivors(layout, erasures)?;
    let mut blocks = vec![vec![0u8; geometry.unit_len()]; layout.units()];
    let mut writer = BufWriter::new(out);
    let mut bytes_read = 0u64;

    for _ in 0..geometry.readins {
        for (reader, block) in readers.iter_mut().zip(blocks.iter_mut()) {
            if let Some(reader) = reader {
                reader.read_exact(block)?;
                bytes_read += block.len() as u64;
            }
        }
        let present = present_units(&readers, &blocks);
        let mut units = session.restore_readin(&present)?;
        writer.write_all(&units.swap_remove(unit))?;
    }
    writer.flush()?;
    Ok(bytes_read)
}

/// Move a finished staging file to its final name
fn persist(staged: NamedTempFile, path: &Path) -> Result<()> {
    staged.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn open_survivors(layout: &CodingLayout, erasures: &ErasureSet) -> Result<Vec<Option<BufReader<File>>>> {
    (0..layout.units())
        .map(|unit| {
            if erasures.contains(unit) {
                Ok(None)
            } else {
                Ok(Some(BufReader::new(File::open(layout.unit_path(unit))?)))
            }
        })
        .collect()
}

fn present_units<'a, R>(readers: &[Option<R>], blocks: &'a [Vec<u8>]) -> Vec<Option<&'a [u8]>> {
    readers
        .iter()
        .zip(blocks)
        .map(|(reader, block)| reader.as_ref().map(|_| block.as_slice()))
        .collect()
}

fn file_name(input: &Path) -> Result<String> {
    input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidConfig(format!("{} has no file name", input.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Technique;
    use crate::session::Mode;
    use std::fs;
    use tempfile::TempDir;

    fn write_input(dir: &TempDir, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        let path = dir.path().join(name);
        fs::write(&path, &data).unwrap();
        (path, data)
    }

    fn small_config(technique: Technique) -> CodecConfig {
        let mut config = CodecConfig::new(4, 2, 8, technique);
        config.buffer_size = 4096;
        config.threads = Some(2);
        config
    }

    #[test]
    fn test_encode_decode_with_lost_units() {
        let temp = TempDir::new().unwrap();
        let (input, data) = write_input(&temp, "notes.txt", 10_000);
        let registry = FieldRegistry::new();

        let report = encode_file(&input, &small_config(Technique::ReedSolVan), &registry).unwrap();
        assert!(report.metadata.blake3.is_some());
        assert!(report.metadata.readins > 1);
        assert_eq!(report.summary.unwrap().mode, Mode::Encode);
        for unit in 0..6 {
            let len = fs::metadata(report.layout.unit_path(unit)).unwrap().len();
            assert_eq!(len, report.metadata.unit_len());
        }

        fs::remove_file(report.layout.unit_path(1)).unwrap();
        fs::remove_file(report.layout.unit_path(4)).unwrap();

        let decoded = decode_file(&input, &registry).unwrap();
        assert_eq!(decoded.erasures.as_slice(), &[1, 4]);
        assert_eq!(decoded.output, temp.path().join("Coding/notes_decoded.txt"));
        assert_eq!(fs::read(&decoded.output).unwrap(), data);
    }

    #[test]
    fn test_bitmatrix_round_trip() {
        let temp = TempDir::new().unwrap();
        let (input, data) = write_input(&temp, "image.raw", 7_777);
        let registry = FieldRegistry::new();
        let mut config = small_config(Technique::CauchyGood);
        config.packet_size = 8;

        let report = encode_file(&input, &config, &registry).unwrap();
        fs::remove_file(report.layout.unit_path(0)).unwrap();

        let decoded = decode_file(&input, &registry).unwrap();
        assert_eq!(fs::read(decoded.output).unwrap(), data);
    }

    #[test]
    fn test_repair_restores_unit() {
        let temp = TempDir::new().unwrap();
        let (input, _) = write_input(&temp, "archive.tar.gz", 20_000);
        let registry = FieldRegistry::new();
        let report = encode_file(&input, &small_config(Technique::ReedSolVan), &registry).unwrap();

        let path = report.layout.unit_path(2);
        let original = fs::read(&path).unwrap();
        fs::remove_file(&path).unwrap();

        let repaired = repair_unit(&input, 2, &registry).unwrap();
        assert_eq!(repaired.path, path);
        assert_eq!(fs::read(&path).unwrap(), original);

        // Only half the planes of the five survivors are read
        let survivors = 5 * report.metadata.unit_len();
        assert_eq!(repaired.bytes_read, survivors / 2);
        assert_eq!(repaired.summary.unwrap().mode, Mode::Repair);
    }

    #[test]
    fn test_repair_with_other_damage() {
        let temp = TempDir::new().unwrap();
        let (input, _) = write_input(&temp, "log.txt", 9_000);
        let registry = FieldRegistry::new();
        let report = encode_file(&input, &small_config(Technique::ReedSolVan), &registry).unwrap();

        let target = report.layout.unit_path(5);
        let original = fs::read(&target).unwrap();
        fs::remove_file(&target).unwrap();
        fs::remove_file(report.layout.unit_path(0)).unwrap();

        repair_unit(&input, 5, &registry).unwrap();
        assert_eq!(fs::read(&target).unwrap(), original);
        assert!(!report.layout.unit_path(0).exists());
    }

    #[test]
    fn test_corruption_detected() {
        let temp = TempDir::new().unwrap();
        let (input, _) = write_input(&temp, "data.bin", 5_000);
        let registry = FieldRegistry::new();
        let report = encode_file(&input, &small_config(Technique::ReedSolVan), &registry).unwrap();

        // Same length, different bytes: not detected as an erasure
        let path = report.layout.unit_path(0);
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = decode_file(&input, &registry).unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch { .. }));
    }

    /// Files in the coding directory other than units and metadata
    fn leftovers(layout: &CodingLayout) -> Vec<PathBuf> {
        let mut known: Vec<PathBuf> = (0..layout.units()).map(|u| layout.unit_path(u)).collect();
        known.push(layout.metadata_path());
        fs::read_dir(layout.dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| !known.contains(path))
            .collect()
    }

    #[test]
    fn test_failed_decode_leaves_no_output() {
        let temp = TempDir::new().unwrap();
        let (input, _) = write_input(&temp, "data.bin", 5_000);
        let registry = FieldRegistry::new();
        let report = encode_file(&input, &small_config(Technique::ReedSolVan), &registry).unwrap();

        let path = report.layout.unit_path(1);
        let mut bytes = fs::read(&path).unwrap();
        bytes[10] ^= 0x5a;
        fs::write(&path, bytes).unwrap();

        assert!(decode_file(&input, &registry).is_err());
        assert!(!temp.path().join("Coding/data_decoded.bin").exists());
        assert!(leftovers(&report.layout).is_empty());
    }

    #[test]
    fn test_failed_repair_keeps_unit_absent() {
        let temp = TempDir::new().unwrap();
        let (input, _) = write_input(&temp, "data.bin", 3_000);
        let registry = FieldRegistry::new();
        let report = encode_file(&input, &small_config(Technique::ReedSolVan), &registry).unwrap();
        for unit in [0, 1, 2] {
            fs::remove_file(report.layout.unit_path(unit)).unwrap();
        }

        assert!(repair_unit(&input, 0, &registry).is_err());
        assert!(!report.layout.unit_path(0).exists());
        assert!(leftovers(&report.layout).is_empty());
    }

    #[test]
    fn test_too_many_lost_units() {
        let temp = TempDir::new().unwrap();
        let (input, _) = write_input(&temp, "data.bin", 3_000);
        let registry = FieldRegistry::new();
        let report = encode_file(&input, &small_config(Technique::ReedSolVan), &registry).unwrap();
        for unit in [0, 1, 2] {
            fs::remove_file(report.layout.unit_path(unit)).unwrap();
        }
        assert!(matches!(
            decode_file(&input, &registry),
            Err(Error::SingularMatrix(_))
        ));
    }

    #[test]
    fn test_random_encode() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("random.bin");
        let registry = FieldRegistry::new();

        let report = encode_random(&target, 6_000, &small_config(Technique::ReedSolVan), &registry).unwrap();
        assert!(report.metadata.blake3.is_none());
        assert!(!target.exists());

        let decoded = decode_file(&target, &registry).unwrap();
        assert_eq!(fs::metadata(decoded.output).unwrap().len(), 6_000);
    }

    #[test]
    fn test_empty_file() {
        let temp = TempDir::new().unwrap();
        let (input, _) = write_input(&temp, "empty", 0);
        let registry = FieldRegistry::new();

        let report = encode_file(&input, &small_config(Technique::ReedSolVan), &registry).unwrap();
        assert_eq!(report.metadata.readins, 0);
        assert!(report.summary.is_none());

        let decoded = decode_file(&input, &registry).unwrap();
        assert_eq!(fs::read(decoded.output).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_missing_metadata() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("nothing.bin");
        assert!(matches!(
            decode_file(&input, &FieldRegistry::new()),
            Err(Error::Config(_))
        ));
    }
}
