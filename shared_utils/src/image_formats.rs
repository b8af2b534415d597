//! Container sniffing for animated formats.
//!
//! Works on raw header bytes only; no pixel data is decoded. GIF needs no
//! sniffing: every GIF takes the animated path.

pub mod webp {
    use std::io::{self, Read};

    /// An animated WebP always starts with a VP8X chunk whose flag byte has
    /// the animation bit set, so the first 21 bytes are enough.
    pub fn is_animated_header(header: &[u8]) -> bool {
        header.len() >= 21
            && &header[0..4] == b"RIFF"
            && &header[8..12] == b"WEBP"
            && &header[12..16] == b"VP8X"
            && header[20] & 0x02 != 0
    }

    pub fn is_animated<R: Read>(reader: R) -> io::Result<bool> {
        let mut header = Vec::with_capacity(21);
        reader.take(21).read_to_end(&mut header)?;
        Ok(is_animated_header(&header))
    }
}
