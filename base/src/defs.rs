use std::error::Error as StdError;
use std::fmt;
use std::result::Result as StdResult;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Configuration,
    DispatchFailure,
    InconsistentState,
    IoError,
    MalformedData,
    UnsupportedFeature,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub description: String,
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, description: String) -> Self {
        Self {
            kind,
            description,
            source: None,
        }
    }

    pub fn with_source<E: StdError + Send + Sync + 'static>(
        kind: ErrorKind,
        description: String,
        source: E,
    ) -> Self {
        Self {
            kind,
            description,
            source: Some(Box::new(source)),
        }
    }

    // Prepends a context such as "chunk 3" to the description.
    pub fn context(mut self, context: &str) -> Self {
        self.description = format!("{}: {}", context, self.description);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)?;
        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn StdError + 'static))
    }
}

pub type Result<T> = StdResult<T, Error>;

pub trait IntoResult<T> {
    fn res<F: FnOnce() -> String>(self, f: F) -> Result<T>;

    fn res_as<F: FnOnce() -> String>(self, kind: ErrorKind, f: F)
        -> Result<T>;
}

impl<T, E: StdError + Send + Sync + 'static> IntoResult<T> for StdResult<T, E> {
    fn res<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.res_as(ErrorKind::IoError, f)
    }

    fn res_as<F: FnOnce() -> String>(
        self,
        kind: ErrorKind,
        f: F,
    ) -> Result<T> {
        self.map_err(|e| Error::with_source(kind, f(), e))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use ErrorKind::*;

    #[test]
    fn test_res_keeps_source() {
        let res: StdResult<(), io::Error> =
            Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        let err = res.res(|| "failed to open file 'a'".to_string()).unwrap_err();
        assert_eq!(err.kind, IoError);
        assert_eq!(&err.description, "failed to open file 'a'");
        assert_eq!(err.to_string(), "failed to open file 'a' (no such file)");
    }

    #[test]
    fn test_context() {
        let err = Error::new(MalformedData, "bad face".to_string())
            .context("chunk 3");
        assert_eq!(err.kind, MalformedData);
        assert_eq!(&err.description, "chunk 3: bad face");
    }
}
