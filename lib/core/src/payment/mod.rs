mod gateway;
pub mod transport;

pub use gateway::PaymentGateway;
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody,
};
