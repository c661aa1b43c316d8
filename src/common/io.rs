//! Common, IO-related code.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

use crate::err::PandoraError;

/// Transparently open a file with gzip decoder.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead>, PandoraError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if path.extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for reading", path);
        let file = File::open(path).map_err(|e| PandoraError::io(path, e))?;
        let bufreader = BufReader::new(file);
        let decoder = MultiGzDecoder::new(bufreader);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path);
        let file = File::open(path)
            .map(BufReader::new)
            .map_err(|e| PandoraError::io(path, e))?;
        Ok(Box::new(file))
    }
}

/// Transparently open a file with gzip encoder.
pub fn open_write_maybe_gz<P>(path: P) -> Result<Box<dyn Write>, PandoraError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if path.extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for writing", path);
        let file = File::create(path).map_err(|e| PandoraError::io(path, e))?;
        let bufwriter = BufWriter::new(file);
        let encoder = GzEncoder::new(bufwriter, Compression::default());
        Ok(Box::new(encoder))
    } else {
        tracing::trace!("Opening {:?} as plain text for writing", path);
        let file = File::create(path).map_err(|e| PandoraError::io(path, e))?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write as _};

    #[test]
    fn open_write_maybe_gz_plain_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");

        {
            let mut f = super::open_write_maybe_gz(&path).unwrap();
            f.write_all(b"hello").unwrap();
            f.flush().unwrap();
        }

        let mut f = std::fs::File::open(&path).map(std::io::BufReader::new).unwrap();
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn open_write_maybe_gz_gz_round_trips_through_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt.gz");

        {
            let mut f = super::open_write_maybe_gz(&path).unwrap();
            f.write_all(b"hello").unwrap();
        }

        let mut reader = super::open_read_maybe_gz(&path).unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }
}
