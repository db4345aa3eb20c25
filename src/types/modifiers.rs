//! Decoding of `atttypmod` / RowDescription type modifiers.
//!
//! PostgreSQL packs precision, scale, length and interval fields into a
//! single `int4`; the layout depends on the type's `typmodin` function.

/// Varlena header size folded into character and numeric modifiers.
const VARHDRSZ: i32 = 4;

/// Interval precision meaning "not specified".
pub const INTERVAL_FULL_PRECISION: u32 = 0xffff;

/// How a type packs its modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ModifierKind {
    #[default]
    None,
    Numeric,
    /// varchar, bpchar
    CharLength,
    /// bit, varbit
    BitLength,
    /// time, timetz, timestamp, timestamptz
    TimePrecision,
    Interval,
}

impl ModifierKind {
    /// Select from the name of the type's `typmodin` function.
    pub fn from_proc(typmodin: &str) -> Self {
        match typmodin.trim_start_matches("pg_catalog.") {
            "numerictypmodin" => ModifierKind::Numeric,
            "varchartypmodin" | "bpchartypmodin" => ModifierKind::CharLength,
            "bittypmodin" | "varbittypmodin" => ModifierKind::BitLength,
            "timetypmodin" | "timetztypmodin" | "timestamptypmodin" | "timestamptztypmodin" => {
                ModifierKind::TimePrecision
            }
            "intervaltypmodin" => ModifierKind::Interval,
            _ => ModifierKind::None,
        }
    }

    /// Unpack `typmod`; -1 means no modifier was given.
    pub fn parse(self, typmod: i32) -> Modifiers {
        let mut mods = Modifiers::default();
        if typmod == -1 {
            return mods;
        }

        match self {
            ModifierKind::None => {}
            ModifierKind::Numeric => {
                let packed = typmod - VARHDRSZ;
                mods.precision = Some(((packed >> 16) & 0xffff) as u32);
                mods.scale = Some((packed & 0xffff) as u32);
            }
            ModifierKind::CharLength => {
                if typmod > VARHDRSZ {
                    mods.length = Some((typmod - VARHDRSZ) as u32);
                }
            }
            ModifierKind::BitLength => {
                mods.length = Some(typmod as u32);
            }
            ModifierKind::TimePrecision => {
                mods.precision = Some(typmod as u32);
            }
            ModifierKind::Interval => {
                mods.precision = Some((typmod & 0xffff) as u32);
                mods.interval_fields = Some(((typmod >> 16) & 0x7fff) as u32);
            }
        }
        mods
    }
}

/// Unpacked type modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub precision: Option<u32>,
    pub scale: Option<u32>,
    pub length: Option<u32>,
    /// Bit mask of the interval fields (YEAR, MONTH, ...)
    pub interval_fields: Option<u32>,
}

impl Modifiers {
    pub fn is_empty(&self) -> bool {
        *self == Modifiers::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_precision_and_scale() {
        // numeric(10,2): ((10 << 16) | 2) + 4
        let mods = ModifierKind::Numeric.parse(((10 << 16) | 2) + 4);
        assert_eq!(mods.precision, Some(10));
        assert_eq!(mods.scale, Some(2));
        assert!(ModifierKind::Numeric.parse(-1).is_empty());
    }

    #[test]
    fn char_length() {
        // varchar(32)
        assert_eq!(ModifierKind::CharLength.parse(36).length, Some(32));
        assert_eq!(ModifierKind::CharLength.parse(4).length, None);
        assert!(ModifierKind::CharLength.parse(-1).is_empty());
    }

    #[test]
    fn bit_and_time() {
        assert_eq!(ModifierKind::BitLength.parse(8).length, Some(8));
        assert_eq!(ModifierKind::TimePrecision.parse(3).precision, Some(3));
        assert!(ModifierKind::TimePrecision.parse(-1).is_empty());
    }

    #[test]
    fn interval_fields_and_precision() {
        // INTERVAL DAY TO SECOND(3): fields mask 0x1c08 in the high half
        let typmod = (0x1c08 << 16) | 3;
        let mods = ModifierKind::Interval.parse(typmod);
        assert_eq!(mods.precision, Some(3));
        assert_eq!(mods.interval_fields, Some(0x1c08));

        let unspecified = ModifierKind::Interval.parse((0x7fff << 16) | 0xffff);
        assert_eq!(unspecified.precision, Some(INTERVAL_FULL_PRECISION));
    }

    #[test]
    fn proc_names() {
        assert_eq!(ModifierKind::from_proc("numerictypmodin"), ModifierKind::Numeric);
        assert_eq!(
            ModifierKind::from_proc("pg_catalog.timestamptztypmodin"),
            ModifierKind::TimePrecision
        );
        assert_eq!(ModifierKind::from_proc("-"), ModifierKind::None);
    }
}
