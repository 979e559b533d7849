use std::fmt;

use failure::Backtrace;
use failure::Context;
use failure::Fail;

/// Error information returned by functions in case of errors.
#[derive(Debug)]
pub struct Error(Context<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.get_context()
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.0.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.0.backtrace()
    }

    fn name(&self) -> Option<&str> {
        self.kind().kind_name()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Context::new(kind))
    }
}

// Support conversion from custom error kinds so modules can wrap
// collaborator errors in their own kinds before they become an `Error`.
impl<E> From<Context<E>> for Error
where
    E: Into<ErrorKind> + fmt::Display + Sync + Send,
{
    fn from(context: Context<E>) -> Error {
        let context = context.map(Into::into);
        Error(context)
    }
}

/// Exhaustive list of possible errors emitted by this crate.
#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "unable to load configuration")]
    ConfigLoad,

    #[fail(display = "connection error to {} with address '{}'", _0, _1)]
    Connection(&'static str, String),

    /// Generic context for errors raised by collaborator libraries.
    #[fail(display = "{}", _0)]
    FreeForm(String),

    #[fail(display = "I/O error on file {}", _0)]
    Io(String),

    #[fail(display = "the cluster observer is not running")]
    ObserverGone,

    #[fail(display = "cluster operation '{}' failed", _0)]
    StoreOpFailed(&'static str),

    #[fail(display = "unable to spawn '{}' thread", _0)]
    ThreadSpawn(&'static str),
}

impl ErrorKind {
    fn kind_name(&self) -> Option<&str> {
        let name = match self {
            ErrorKind::ConfigLoad => "ConfigLoad",
            ErrorKind::Connection(_, _) => "Connection",
            ErrorKind::FreeForm(_) => "FreeForm",
            ErrorKind::Io(_) => "Io",
            ErrorKind::ObserverGone => "ObserverGone",
            ErrorKind::StoreOpFailed(_) => "StoreOpFailed",
            ErrorKind::ThreadSpawn(_) => "ThreadSpawn",
        };
        Some(name)
    }
}

/// Convert errors from collaborator libraries into observer errors.
pub fn to_error<E: fmt::Display>(error: E) -> Error {
    ErrorKind::FreeForm(error.to_string()).into()
}

/// Short form alias for functions returning `Error`s.
pub type Result<T> = ::std::result::Result<T, Error>;
