// Hardware collaborators used by the timing context

/// Failure reported by a sensor collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    #[error("ADC read failed: {0}")]
    ReadFailed(String),

    #[error("Sensor not ready")]
    NotReady,
}

/// Analog input (potentiometer ADC).
/// Must be cheap and non-blocking.
pub trait AnalogInput {
    fn read_raw(&mut self) -> Result<u16, SensorError>;
}

/// Rising-edge detector on the external clock input.
///
/// Returns edges in chronological order, at most one per call,
/// with microsecond timestamps on the same time base as the engine.
/// `Ok(None)` means no edge is pending.
pub trait EdgeInput {
    fn poll_edge(&mut self) -> Result<Option<u64>, SensorError>;
}

/// Edge input with nothing connected
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEdges;

impl EdgeInput for NoEdges {
    fn poll_edge(&mut self) -> Result<Option<u64>, SensorError> {
        Ok(None)
    }
}

impl<E: EdgeInput> EdgeInput for Option<E> {
    fn poll_edge(&mut self) -> Result<Option<u64>, SensorError> {
        match self {
            Some(edges) => edges.poll_edge(),
            None => Ok(None),
        }
    }
}
