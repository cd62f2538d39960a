// SPDX-License-Identifier: MIT OR Apache-2.0

//! Small helpers.

/// Formats hex plus printable ascii, for packet traces.
pub(crate) struct HexDump<'a>(pub &'a [u8]);

impl core::fmt::Debug for HexDump<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02x?}  ", self.0)?;
        for c in self.0 {
            if c.is_ascii() && !c.is_ascii_control() {
                write!(f, "{}", char::from(*c))?;
            } else {
                write!(f, ".")?;
            }
        }
        Ok(())
    }
}
