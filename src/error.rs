use std::path::PathBuf;

use thiserror::Error;

/// Failures reading or writing persisted records.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("couldn't access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("couldn't serialize record {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: toml::ser::Error,
    },
    #[error("couldn't parse record {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    #[error("a station with id `{0}` already exists")]
    DuplicateId(String),
    #[error("no custom station with id `{0}`")]
    UnknownId(String),
    #[error("built-in station `{0}` can't be changed")]
    BuiltInImmutable(String),
    #[error("station id must not be empty")]
    EmptyId,
    #[error("station needs a stream url or a file path")]
    EmptyLocator,
    #[error("`{0}` is not an http(s) stream url")]
    InvalidUrl(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlarmError {
    #[error("{hour:02}:{minute:02} is not a valid time of day")]
    InvalidTime { hour: u32, minute: u32 },
    #[error("couldn't parse `{0}` as HH:MM")]
    MalformedTime(String),
    #[error("snooze duration must be between 1 and {max} minutes, got {got}")]
    InvalidSnooze { got: u32, max: u32 },
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("couldn't open audio output: {0}")]
    Output(String),
    #[error("couldn't open sound file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("couldn't decode audio: {0}")]
    Decode(String),
    #[error("couldn't connect to stream {url}: {reason}")]
    Stream { url: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("couldn't parse `{0}` as a duration (seconds or HH:MM:SS)")]
    MalformedDuration(String),
    #[error("{0} is out of range for {1}")]
    OutOfRange(u32, &'static str),
}

/// Everything the library can hand back to the command line.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Station(#[from] StationError),
    #[error(transparent)]
    Alarm(#[from] AlarmError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Timer(#[from] TimerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_value() {
        let err = AlarmError::InvalidTime {
            hour: 24,
            minute: 5,
        };
        assert_eq!(err.to_string(), "24:05 is not a valid time of day");

        let err = StationError::BuiltInImmutable("classic".to_string());
        assert_eq!(err.to_string(), "built-in station `classic` can't be changed");

        let err: Error = TimerError::OutOfRange(75, "minutes").into();
        assert_eq!(err.to_string(), "75 is out of range for minutes");
    }
}
