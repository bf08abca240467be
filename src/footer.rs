//! The outer combined-file envelope: signature, section markers and the
//! footer flatbuffer locating the embedded Arrow sub-files.

use std::io::{Read, Seek, SeekFrom};

use flatbuffers::root;
use uuid::Uuid;

use crate::error::{Pod5Error, Result};
use crate::footer_generated::minknow::reads_format::{ContentType, Footer, Format};

/// First and last eight bytes of every combined POD5 file.
pub const FILE_SIGNATURE: [u8; 8] = [0x8b, b'P', b'O', b'D', b'\r', b'\n', 0x1a, b'\n'];

/// Marker preceding the footer flatbuffer.
pub const FOOTER_MAGIC: [u8; 8] = [b'F', b'O', b'O', b'T', b'E', b'R', 0x00, 0x00];

/// Length of a section marker (a per-file random UUID).
pub const SECTION_MARKER_LENGTH: usize = 16;

/// Byte window of one embedded Arrow file within the combined file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedFileInfo {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug)]
pub(crate) struct RunInfoTable(pub(crate) EmbeddedFileInfo);

#[derive(Debug)]
pub(crate) struct ReadTable(pub(crate) EmbeddedFileInfo);

#[derive(Debug)]
pub(crate) struct SignalTable(pub(crate) EmbeddedFileInfo);

/// The footer flatbuffer, read back out of a combined file.
pub struct ParsedFooter {
    data: Vec<u8>,
}

impl ParsedFooter {
    pub fn footer(&self) -> Result<Footer<'_>> {
        Ok(root::<Footer>(&self.data)?)
    }

    /// Read the footer from the end of a combined file. Signature bytes are
    /// not checked here; `Pod5Reader` verifies both ends before parsing.
    pub fn read_footer<R: Read + Seek>(mut reader: R) -> Result<Self> {
        let file_length = reader.seek(SeekFrom::End(0))?;
        let footer_length_offset =
            -(FILE_SIGNATURE.len() as i64) - (SECTION_MARKER_LENGTH as i64) - 8;
        reader.seek(SeekFrom::End(footer_length_offset))?;
        let mut buf = [0; 8];
        reader.read_exact(&mut buf)?;
        let flen = i64::from_le_bytes(buf);
        if flen <= 0 || flen as u64 > file_length {
            return Err(Pod5Error::consistency(format!(
                "Invalid footer length {flen}"
            )));
        }
        reader.seek(SeekFrom::End(footer_length_offset - flen))?;
        let mut buf = vec![0u8; flen as usize];
        reader.read_exact(&mut buf)?;
        let parsed = Self { data: buf };
        // Run the verifier once up front so later accesses cannot fail.
        parsed.footer()?;
        Ok(parsed)
    }

    pub fn file_identifier(&self) -> Result<Uuid> {
        let footer = self.footer()?;
        let identifier = footer
            .file_identifier()
            .ok_or_else(|| Pod5Error::consistency("Footer is missing a file identifier"))?;
        Uuid::parse_str(identifier).map_err(|_| {
            Pod5Error::consistency(format!("Invalid file identifier in footer: '{identifier}'"))
        })
    }

    pub fn software(&self) -> Result<Option<String>> {
        Ok(self.footer()?.software().map(str::to_string))
    }

    pub fn pod5_version(&self) -> Result<Option<String>> {
        Ok(self.footer()?.pod5_version().map(str::to_string))
    }

    fn find_table(&self, content_type: ContentType, err: Pod5Error) -> Result<EmbeddedFileInfo> {
        let footer = self.footer()?;
        let contents = footer.contents().ok_or(Pod5Error::ContentsMissing)?;
        let mut efile = None;
        for c in contents {
            if c.format() != Format::FeatherV2 {
                return Err(Pod5Error::consistency(format!(
                    "Unknown embedded file format {:?}",
                    c.format()
                )));
            }
            if c.content_type().variant_name().is_none() {
                return Err(Pod5Error::consistency(format!(
                    "Unknown embedded file content type {:?}",
                    c.content_type()
                )));
            }
            if c.content_type() == content_type {
                efile = Some(c);
                break;
            }
        }
        let efile = efile.ok_or(err)?;

        if efile.offset() <= 0 || efile.length() <= 0 {
            return Err(Pod5Error::consistency(format!(
                "Invalid {:?} found in file: offset {} length {}",
                content_type,
                efile.offset(),
                efile.length()
            )));
        }

        Ok(EmbeddedFileInfo {
            offset: efile.offset() as u64,
            length: efile.length() as u64,
        })
    }

    pub(crate) fn read_table(&self) -> Result<ReadTable> {
        Ok(ReadTable(self.find_table(
            ContentType::ReadsTable,
            Pod5Error::ReadTableMissing,
        )?))
    }

    pub(crate) fn signal_table(&self) -> Result<SignalTable> {
        Ok(SignalTable(self.find_table(
            ContentType::SignalTable,
            Pod5Error::SignalTableMissing,
        )?))
    }

    pub(crate) fn run_info_table(&self) -> Result<Option<RunInfoTable>> {
        match self.find_table(ContentType::RunInfoTable, Pod5Error::RunInfoTableMissing) {
            Ok(info) => Ok(Some(RunInfoTable(info))),
            Err(Pod5Error::RunInfoTableMissing) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use flatbuffers::FlatBufferBuilder;

    use super::*;
    use crate::footer_generated::minknow::reads_format::{
        EmbeddedFile, EmbeddedFileArgs, FooterArgs,
    };

    fn build_test_file(reads: (i64, i64), signal: (i64, i64), identifier: &Uuid) -> Vec<u8> {
        let mut builder = FlatBufferBuilder::new();
        let mut tables = Vec::new();
        for (offset, length, content_type) in [
            (signal.0, signal.1, ContentType::SignalTable),
            (reads.0, reads.1, ContentType::ReadsTable),
        ] {
            tables.push(EmbeddedFile::create(
                &mut builder,
                &EmbeddedFileArgs {
                    offset,
                    length,
                    format: Format::FeatherV2,
                    content_type,
                },
            ));
        }
        let contents = Some(builder.create_vector(&tables));
        let file_identifier = Some(builder.create_string(&identifier.to_string()));
        let software = Some(builder.create_string("footer tests"));
        let pod5_version = Some(builder.create_string("0.3.2"));
        let footer = Footer::create(
            &mut builder,
            &FooterArgs {
                file_identifier,
                software,
                pod5_version,
                contents,
            },
        );
        builder.finish_minimal(footer);
        let fb = builder.finished_data().to_vec();

        let marker = Uuid::new_v4();
        let mut file = Vec::new();
        file.extend_from_slice(&FILE_SIGNATURE);
        file.extend_from_slice(marker.as_bytes());
        file.extend_from_slice(&[0u8; 64]); // stand-in for sub-file content
        file.extend_from_slice(&FOOTER_MAGIC);
        let footer_start = file.len();
        file.extend_from_slice(&fb);
        while file.len() % 8 != 0 {
            file.push(0);
        }
        let footer_length = (file.len() - footer_start) as i64;
        file.extend_from_slice(&footer_length.to_le_bytes());
        file.extend_from_slice(marker.as_bytes());
        file.extend_from_slice(&FILE_SIGNATURE);
        file
    }

    #[test]
    fn test_footer_roundtrip() -> eyre::Result<()> {
        let identifier = Uuid::new_v4();
        let bytes = build_test_file((24, 40), (64, 24), &identifier);
        assert_eq!(bytes[..8], FILE_SIGNATURE);
        assert_eq!(bytes[bytes.len() - 8..], FILE_SIGNATURE);
        let parsed = ParsedFooter::read_footer(Cursor::new(&bytes))?;
        assert_eq!(parsed.file_identifier()?, identifier);
        assert_eq!(parsed.read_table()?.0, EmbeddedFileInfo { offset: 24, length: 40 });
        assert_eq!(parsed.signal_table()?.0, EmbeddedFileInfo { offset: 64, length: 24 });
        assert!(parsed.run_info_table()?.is_none());
        Ok(())
    }

    #[test]
    fn test_zero_length_table_rejected() {
        let identifier = Uuid::new_v4();
        let bytes = build_test_file((24, 0), (64, 24), &identifier);
        let parsed = ParsedFooter::read_footer(Cursor::new(&bytes)).unwrap();
        assert!(parsed.read_table().is_err());
    }

    #[test]
    fn test_garbage_footer_rejected() {
        let identifier = Uuid::new_v4();
        let mut bytes = build_test_file((24, 40), (64, 24), &identifier);
        // Corrupt the flatbuffer region.
        let start = 24 + 64 + 8;
        for b in &mut bytes[start..start + 16] {
            *b = 0xff;
        }
        assert!(ParsedFooter::read_footer(Cursor::new(&bytes)).is_err());
    }
}
