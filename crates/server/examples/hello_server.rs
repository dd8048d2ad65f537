//! Serves "Hello World!" on 127.0.0.1:8080 until Ctrl-C.
//!
//! Pass a TOML config file as the first argument to override the defaults.

use std::env;

use harbor_http::handler::{BoxError, make_handler};
use harbor_http::protocol::body::BodySink;
use harbor_server::{HttpServer, Listener, ServerConfig};
use http::{Request, Response};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let config = match env::args().nth(1).map(ServerConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            error!(cause = %e, "can't load config");
            return;
        }
    };

    let listener = match Listener::bind("127.0.0.1:8080").await {
        Ok(listener) => listener,
        Err(e) => {
            error!(cause = %e, "bind server error");
            return;
        }
    };

    let mut server = match HttpServer::builder(vec![listener])
        .config(config)
        .on_start(|| async {
            info!("server is ready");
            Ok::<(), BoxError>(())
        })
        .build()
    {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "can't build server");
            return;
        }
    };

    if let Err(e) = server.start(make_handler(hello_world)).await {
        error!(cause = %e, "can't start server");
        return;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(cause = %e, "can't listen for ctrl-c");
    }
    if let Err(e) = server.stop().await {
        error!(cause = %e, "server stopped with errors");
    }
}

async fn hello_world(request: Request<BodySink>) -> Result<Response<String>, BoxError> {
    info!(method = %request.method(), path = request.uri().path(), body_size = request.body().len(), "receiving request");
    Ok(Response::new("Hello World!\r\n".to_string()))
}
