use thiserror::Error;

#[derive(Debug, Error)]
pub enum TripError {
    #[error("activity at chain position {item} ends before it starts")]
    BadActivityWindow { item: usize },
}

pub type TripResult<T> = Result<T, TripError>;
