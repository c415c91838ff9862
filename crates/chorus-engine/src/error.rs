use chorus_core::errors::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("message is empty")]
    EmptyInput,

    #[error("a turn is already in progress")]
    TurnInProgress,

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}
