/// Adaptive Rice coding of residuals.
///
/// Provides the per-channel [`CoderState`](entropy::CoderState) shared by the
/// frame encoder and decoder.
pub mod entropy;

/// Sign-adaptive FIR filter stages.
pub mod nn_filter;

/// Per-channel prediction cascade.
///
/// Provides the [`Predictor`](predictor::Predictor) that turns samples into
/// residuals and back.
pub mod predictor;

/// Frame coding.
///
/// Provides the [`FrameEncoder`](frame::FrameEncoder) and
/// [`FrameDecoder`](frame::FrameDecoder), which code one frame at a time from
/// a fresh state.
pub mod frame;

/// Container writing.
///
/// Provides the streaming [`Encoder`](encode::Encoder) with its
/// [`EncoderConfig`](encode::EncoderConfig).
pub mod encode;

/// Container reading.
///
/// Provides the random-access [`Decoder`](decode::Decoder).
pub mod decode;
