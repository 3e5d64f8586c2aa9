//! Bit flags of the record header and of each version entry.

use bitflags::bitflags;

bitflags! {
    /// Record header byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u8 {
        /// More than one version is stored.
        const MULTIVERSION            = 0x01;
        /// Some newer version has an older timestamp than its successor.
        const TIMESTAMPS_NOT_IN_ORDER = 0x02;
        /// A key catalog follows the bbox.
        const HAS_TAGS                = 0x04;
        /// A base-relative bbox follows the header.
        const HAS_BBOX                = 0x08;
    }
}

bitflags! {
    /// Fields of a version entry that differ from the previously encoded one.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Changed: u8 {
        const USER    = 0x01;
        const TAGS    = 0x02;
        /// Node location, way refs or relation members.
        const PAYLOAD = 0x04;
    }
}
