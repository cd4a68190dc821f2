use std::fmt;

/// Builds a `DexError` of the given kind from a format string.
#[macro_export]
macro_rules! err {
    ($kind:ident, $msg:literal) => {
        $crate::dex::error::DexError::of($crate::dex::error::DexErrorKind::$kind, &format!($msg))
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        $crate::dex::error::DexError::of($crate::dex::error::DexErrorKind::$kind, &format!($fmtstr, $($args)*))
    };
}

/// Returns early with a `DexError` of the given kind.
#[macro_export]
macro_rules! fail {
    ($kind:ident, $msg:literal) => {
        return Err($crate::err!($kind, $msg))
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        return Err($crate::err!($kind, $fmtstr, $($args)*))
    };
}

/// The failure classes a decode or encode can end with. None of them is
/// recoverable for the file being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexErrorKind
{
    /// Buffer too short or magic unrecognized.
    NotADex,
    /// The bytes are a dex file but violate its layout rules.
    InvalidFormat,
    /// The requested API/version/dialect cannot express the content.
    UnsupportedTarget,
    /// A value was used while encoding but never collected into its pool.
    UnresolvedReference,
    /// The program model breaks a structural rule of the format.
    StructuralViolation,
    /// Index or offset outside its section.
    Bounds,
}

impl fmt::Display for DexErrorKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self
        {
            DexErrorKind::NotADex => "not a dex file",
            DexErrorKind::InvalidFormat => "invalid dex file",
            DexErrorKind::UnsupportedTarget => "unsupported target",
            DexErrorKind::UnresolvedReference => "unresolved reference",
            DexErrorKind::StructuralViolation => "structural violation",
            DexErrorKind::Bounds => "out of bounds",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexError
{
    kind: DexErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub fn of(kind: DexErrorKind, msg: &str) -> Self
    {
        DexError {
            kind,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub fn kind(&self) -> DexErrorKind
    {
        self.kind
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self
    {
        self.contexts.push(context.into());
        self
    }
}

/// Attaches a context line to the error side of a result.
pub(crate) trait ResultExt<T>
{
    fn context<F, S>(self, f: F) -> Result<T, DexError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T, DexError>
{
    fn context<F, S>(self, f: F) -> Result<T, DexError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}: {}", self.kind, self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}
