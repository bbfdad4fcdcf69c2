mod config;

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use actix_web::{get, post, put, web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{CONFIG_ENV, ServerChain, ServerConfig};
use rs_chain_core::ChainError;

/// Struct representing query parameters for the `/v1/produce` endpoint
#[derive(Deserialize)]
struct ProduceParams {
	search: Option<String>,
	max_words: Option<usize>,
	max_chars: Option<usize>,
}

struct SharedData {
	chain: ServerChain,
	max_words: usize,
	max_chars: usize,
	prune_every: usize,
	inserted_since_prune: usize,
}

impl SharedData {
	fn new(chain: ServerChain, config: &ServerConfig) -> Self {
		Self {
			chain,
			max_words: config.max_words,
			max_chars: config.max_chars,
			prune_every: config.prune_every,
			inserted_since_prune: 0,
		}
	}
}

fn error_response(e: ChainError) -> HttpResponse {
	match e {
		ChainError::NoLimit | ChainError::InvalidLookSize | ChainError::InvalidConfig(_) => {
			HttpResponse::BadRequest().body(e.to_string())
		}
		e => {
			error!(error = %e, "request failed");
			HttpResponse::InternalServerError().body(e.to_string())
		}
	}
}

/// HTTP PUT endpoint `/v1/insert`
///
/// Learns the body, one line per insert, words split on whitespace.
/// Returns the number of non-empty lines inserted.
#[put("/v1/insert")]
async fn put_insert(data: web::Data<Mutex<SharedData>>, body: String) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let mut inserted = 0;
	for line in body.lines() {
		let words: Vec<&str> = line.split_whitespace().collect();
		if words.is_empty() {
			continue;
		}
		if let Err(e) = shared_data.chain.insert(&words) {
			return error_response(e);
		}
		inserted += 1;
		shared_data.inserted_since_prune += 1;

		if shared_data.prune_every > 0 && shared_data.inserted_since_prune >= shared_data.prune_every {
			if let Err(e) = shared_data.chain.prune_backend() {
				return error_response(e);
			}
			shared_data.inserted_since_prune = 0;
		}
	}

	HttpResponse::Ok().body(inserted.to_string())
}

/// HTTP GET endpoint `/v1/produce`
///
/// Grows a line around `search` (a random word if absent) and returns it
/// space-joined. The body is empty when nothing was found.
#[get("/v1/produce")]
async fn get_produce(data: web::Data<Mutex<SharedData>>, query: web::Query<ProduceParams>) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	let max_words = query.max_words.unwrap_or(shared_data.max_words);
	let max_chars = query.max_chars.unwrap_or(shared_data.max_chars);
	let search: Vec<&str> = query.search.as_deref().unwrap_or("").split_whitespace().collect();

	match shared_data.chain.produce(&search, max_words, max_chars) {
		Ok(result) => HttpResponse::Ok().body(result.join(" ")),
		Err(e) => error_response(e),
	}
}

#[post("/v1/prune")]
async fn post_prune(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let mut shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	match shared_data.chain.prune_backend() {
		Ok(()) => {
			shared_data.inserted_since_prune = 0;
			HttpResponse::Ok().body("Pruned")
		}
		Err(e) => error_response(e),
	}
}

#[get("/v1/state")]
async fn get_state(data: web::Data<Mutex<SharedData>>) -> impl Responder {
	let shared_data = match data.lock() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	HttpResponse::Ok().json(shared_data.chain.state())
}

fn routes(cfg: &mut web::ServiceConfig) {
	cfg.service(put_insert)
		.service(get_produce)
		.service(post_prune)
		.service(get_state);
}

/// Config path: first argument, else `RS_CHAIN_CONFIG`.
fn config_path() -> Option<PathBuf> {
	env::args_os()
		.nth(1)
		.map(PathBuf::from)
		.or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
}

fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

/// Main entry point for the server.
///
/// Loads the configuration, opens the store, and serves the engine behind a
/// `Mutex` until shutdown. The state is then saved, flushing any cached
/// writes.
#[actix_web::main]
async fn main() -> io::Result<()> {
	init_tracing();

	let config = ServerConfig::load(config_path().as_deref()).map_err(io::Error::other)?;
	let chain = config.open_chain().map_err(io::Error::other)?;
	let shared_model = web::Data::new(Mutex::new(SharedData::new(chain, &config)));

	info!(host = %config.host, port = config.port, "listening");
	let server_model = shared_model.clone();
	HttpServer::new(move || {
		App::new()
			.app_data(server_model.clone())
			.configure(routes)
	})
		.bind((config.host.as_str(), config.port))?
		.run()
		.await?;

	let mut shared_data = shared_model
		.lock()
		.map_err(|_| io::Error::other("Model lock failed"))?;
	shared_data.chain.save_state().map_err(io::Error::other)?;
	info!("server stopped");
	Ok(())
}
