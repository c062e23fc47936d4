use thiserror::Error;

/// Pipeline error taxonomy.
///
/// `DeviceUnavailable` and `Configuration` abort `start`; `Decode` and
/// `Inference` only ever cost the current frame.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("unsupported capture configuration: {0}")]
    Configuration(String),

    #[error("frame {sequence} could not be decoded: {reason}")]
    Decode { sequence: u64, reason: String },

    #[error("inference failed on frame {sequence}: {reason}")]
    Inference { sequence: u64, reason: String },

    #[error("pipeline is {0}")]
    Stopped(&'static str),
}

impl PipelineError {
    pub fn decode(sequence: u64, reason: impl ToString) -> Self {
        Self::Decode {
            sequence,
            reason: reason.to_string(),
        }
    }

    pub fn inference(sequence: u64, reason: impl ToString) -> Self {
        Self::Inference {
            sequence,
            reason: reason.to_string(),
        }
    }

    /// Fatal errors end pipeline start-up; the rest are per-frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_) | Self::Configuration(_) | Self::Stopped(_)
        )
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        // The device exists but cannot be used right now.
        let device_gone = matches!(
            e.raw_os_error(),
            Some(libc::EBUSY) | Some(libc::ENODEV) | Some(libc::ENXIO)
        );
        match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Self::DeviceUnavailable(e.to_string())
            }
            _ if device_gone => Self::DeviceUnavailable(e.to_string()),
            _ => Self::Configuration(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_errors_are_not_fatal() {
        assert!(!PipelineError::decode(3, "truncated").is_fatal());
        assert!(!PipelineError::inference(3, "timeout").is_fatal());
        assert!(PipelineError::DeviceUnavailable("busy".into()).is_fatal());
        assert!(PipelineError::Configuration("no MJPG".into()).is_fatal());
    }

    #[test]
    fn io_errors_map_to_device_or_configuration() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            PipelineError::from(denied),
            PipelineError::DeviceUnavailable(_)
        ));

        let invalid = std::io::Error::from(std::io::ErrorKind::InvalidInput);
        assert!(matches!(
            PipelineError::from(invalid),
            PipelineError::Configuration(_)
        ));
    }

    #[test]
    fn busy_or_vanished_devices_are_unavailable() {
        for errno in [libc::EBUSY, libc::ENODEV, libc::ENXIO] {
            let err = std::io::Error::from_raw_os_error(errno);
            assert!(matches!(
                PipelineError::from(err),
                PipelineError::DeviceUnavailable(_)
            ));
        }
        let other = std::io::Error::from_raw_os_error(libc::EINVAL);
        assert!(matches!(
            PipelineError::from(other),
            PipelineError::Configuration(_)
        ));
    }
}
