/// Failures a composite attempt can surface.
///
/// Both variants are recovered at the surface boundary: the displayed image
/// degrades to the last-known-good frame (or the untinted source) rather
/// than going blank.
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    /// The source image was zero-area or its buffer did not match its
    /// dimensions. Fatal to this composite attempt only.
    #[error("invalid source image: {reason}")]
    InvalidImage { reason: String },

    /// No GPU adapter/device could be acquired, or the device was lost
    /// mid-composite. Retryable on the next dirty trigger.
    #[error("gpu device unavailable: {reason}")]
    DeviceUnavailable { reason: String },
}
