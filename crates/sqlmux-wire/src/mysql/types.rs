//! MySQL column type codes.

/// MySQL field type codes.
///
/// These are the `MYSQL_TYPE_*` constants from the MySQL C API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    /// TINYINT (MYSQL_TYPE_TINY)
    Tiny = 0x01,
    /// SMALLINT (MYSQL_TYPE_SHORT)
    Short = 0x02,
    /// INT (MYSQL_TYPE_LONG)
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    /// BIGINT (MYSQL_TYPE_LONGLONG)
    LongLong = 0x08,
    /// MEDIUMINT (MYSQL_TYPE_INT24)
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    /// NEWDATE (MYSQL_TYPE_NEWDATE) - internal use
    NewDate = 0x0E,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    /// VARCHAR (MYSQL_TYPE_VAR_STRING)
    VarString = 0xFD,
    /// CHAR (MYSQL_TYPE_STRING)
    String = 0xFE,
    Geometry = 0xFF,
}

/// Database type names and their codes, as reported by column metadata.
const TYPE_NAMES: &[(&str, FieldType)] = &[
    ("DECIMAL", FieldType::Decimal),
    ("TINYINT", FieldType::Tiny),
    ("SMALLINT", FieldType::Short),
    ("INT", FieldType::Long),
    ("FLOAT", FieldType::Float),
    ("DOUBLE", FieldType::Double),
    ("NULL", FieldType::Null),
    ("TIMESTAMP", FieldType::Timestamp),
    ("BIGINT", FieldType::LongLong),
    ("MEDIUMINT", FieldType::Int24),
    ("DATE", FieldType::Date),
    ("TIME", FieldType::Time),
    ("DATETIME", FieldType::DateTime),
    ("YEAR", FieldType::Year),
    ("NEWDATE", FieldType::NewDate),
    ("VARCHAR", FieldType::VarChar),
    ("BIT", FieldType::Bit),
    ("JSON", FieldType::Json),
    ("NEWDECIMAL", FieldType::NewDecimal),
    ("ENUM", FieldType::Enum),
    ("SET", FieldType::Set),
    ("TINYBLOB", FieldType::TinyBlob),
    ("MEDIUMBLOB", FieldType::MediumBlob),
    ("LONGBLOB", FieldType::LongBlob),
    ("BLOB", FieldType::Blob),
    ("VAR_STRING", FieldType::VarString),
    ("CHAR", FieldType::String),
    ("GEOMETRY", FieldType::Geometry),
];

impl FieldType {
    /// Parse a field type from a byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        TYPE_NAMES
            .iter()
            .map(|&(_, t)| t)
            .find(|t| *t as u8 == value)
            .unwrap_or(FieldType::String) // Unknown types treated as string
    }

    /// Map a database type name (any case) to its field type.
    ///
    /// Common aliases are accepted (`INTEGER`, `TEXT`, `UNSIGNED BIGINT`, ...).
    pub fn from_type_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        let base = upper
            .trim_start_matches("UNSIGNED ")
            .split(['(', ' '])
            .next()
            .unwrap_or_default();
        let alias = match base {
            "INTEGER" => Some(FieldType::Long),
            "BOOL" | "BOOLEAN" => Some(FieldType::Tiny),
            "REAL" => Some(FieldType::Double),
            "NUMERIC" => Some(FieldType::NewDecimal),
            "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" => Some(FieldType::Blob),
            "VARBINARY" => Some(FieldType::VarString),
            "BINARY" => Some(FieldType::String),
            _ => None,
        };
        alias.or_else(|| {
            TYPE_NAMES
                .iter()
                .find(|(n, _)| *n == base)
                .map(|&(_, t)| t)
        })
    }

    /// All canonical type names with their codes.
    pub fn type_names() -> impl Iterator<Item = (&'static str, FieldType)> {
        TYPE_NAMES.iter().copied()
    }

    /// Check if this is an integer type.
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Tiny
                | FieldType::Short
                | FieldType::Long
                | FieldType::LongLong
                | FieldType::Int24
                | FieldType::Year
        )
    }

    /// Check if this is a decimal type.
    #[must_use]
    pub const fn is_decimal(self) -> bool {
        matches!(self, FieldType::Decimal | FieldType::NewDecimal)
    }

    /// Check if this is a binary/blob type.
    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
                | FieldType::Bit
        )
    }

    /// The `decimals` byte of a column definition for this type.
    ///
    /// `scale` is used for decimal types; 0x1f marks "not fixed" for
    /// variable-width strings and floating-point types.
    pub fn column_decimals(self, scale: i64) -> u8 {
        match self {
            FieldType::VarChar | FieldType::VarString | FieldType::Double | FieldType::Float => {
                0x1f
            }
            FieldType::Decimal | FieldType::NewDecimal => u8::try_from(scale.clamp(0, 0x1e)).unwrap_or(0),
            _ => 0,
        }
    }
}
