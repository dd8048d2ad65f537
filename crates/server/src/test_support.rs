use std::sync::{Arc, LazyLock};

use harbor_http::handler::{BoxError, DefaultErrorHandler, make_handler};
use harbor_http::protocol::body::BodySink;
use http::{Request, Response};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio_util::sync::CancellationToken;

use crate::client_handler::ClientContext;

struct SelfSigned {
    cert: CertificateDer<'static>,
    key: Vec<u8>,
}

static SELF_SIGNED: LazyLock<SelfSigned> = LazyLock::new(|| {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
    SelfSigned { cert: certified.cert.der().clone(), key: certified.key_pair.serialize_der() }
});

pub(crate) fn server_tls_config() -> rustls::ServerConfig {
    let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(SELF_SIGNED.key.clone()));
    rustls::ServerConfig::builder().with_no_client_auth().with_single_cert(vec![SELF_SIGNED.cert.clone()], key).unwrap()
}

pub(crate) fn client_tls_config(alpn_protocols: &[&str]) -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(SELF_SIGNED.cert.clone()).unwrap();
    let mut config = rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    config.alpn_protocols = alpn_protocols.iter().map(|protocol| protocol.as_bytes().to_vec()).collect();
    Arc::new(config)
}

pub(crate) async fn hello(_request: Request<BodySink>) -> Result<Response<String>, BoxError> {
    Ok(Response::new("Hello World!".to_owned()))
}

pub(crate) fn client_context() -> ClientContext {
    ClientContext {
        handler: Arc::new(make_handler(hello)),
        error_handler: Arc::new(DefaultErrorHandler),
        shutdown: CancellationToken::new(),
    }
}
