pub mod capture;
pub mod httpcode;
pub mod requests;
pub mod response;
pub mod sequence_endpoint;
pub mod sequences;
pub mod stream;
pub mod webhook;
