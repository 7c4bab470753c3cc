//! Internal time-series batch messages. Values holding one of these are
//! tagged `TIMESERIES` rather than `BYTES` so they can only be read back
//! through the matching accessor.

/// A batch of samples for one time-series, rolled up at a fixed resolution.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InternalTimeSeriesData {
    /// Start of the batch, in nanoseconds since the Unix epoch.
    #[prost(int64, tag = "1")]
    pub start_timestamp_nanos: i64,
    /// Width of each sample slot in nanoseconds.
    #[prost(int64, tag = "2")]
    pub sample_duration_nanos: i64,
    #[prost(message, repeated, tag = "3")]
    pub samples: Vec<InternalTimeSeriesSample>,
}

/// One rolled-up sample slot.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InternalTimeSeriesSample {
    /// Slot offset from the batch start, in sample durations.
    #[prost(int32, tag = "1")]
    pub offset: i32,
    #[prost(uint32, tag = "6")]
    pub count: u32,
    #[prost(double, tag = "7")]
    pub sum: f64,
    #[prost(double, optional, tag = "8")]
    pub max: Option<f64>,
    #[prost(double, optional, tag = "9")]
    pub min: Option<f64>,
}
