pub mod frame;
pub mod generate_content;
pub mod schema;

pub use schema::sanitize_schema;

pub use generate_content::{
    ClientRequest, ClientResponse, Proto, StreamTranslator, TransformError, decode_stream_chunk,
    transform_response,
};
