//! Remote market data clients

pub mod remote;

pub use remote::RemoteMarketData;
