use crate::site::{Context, Resource};
use crate::watch::Watch;
use anyhow::Result;
use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response, sse},
    routing::get,
};
use axum_extra::body::AsyncReadBody;
use std::convert::Infallible;
use std::path;
use std::sync::{Arc, RwLock};
use tokio::fs;
use tokio_stream::{Stream, StreamExt};

#[derive(Clone)]
struct AppState {
    ctx: Arc<RwLock<Context>>,
    watch: Arc<Watch>,
}

type HandlerError = (StatusCode, String);

#[tokio::main]
pub async fn serve(ctx: Context, port: u16) -> Result<()> {
    // Watch the site directory and, in debug mode, the templates directory.
    let mut watched = vec![ctx.site_dir.as_path()];
    if cfg!(debug_assertions) {
        watched.push(path::Path::new(crate::site::TEMPLATES.dir));
    }
    let watch = Watch::new(&watched)?;
    let state = AppState {
        ctx: Arc::new(RwLock::new(ctx)),
        watch: Arc::new(watch),
    };

    let app = Router::new()
        .route("/_notify", get(notify))
        .route("/", get(index))
        .route("/{*path}", get(resource))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Respond with the contents of a file on the filesystem.
async fn send_file(path: &path::Path) -> Result<Response, HandlerError> {
    let mime = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(mime_guess::mime::OCTET_STREAM.as_str());

    let file = fs::File::open(path)
        .await
        .map_err(|e| (StatusCode::NOT_FOUND, format!("not found: {e}")))?;

    let headers = [(header::CONTENT_TYPE, mime)];
    let body = AsyncReadBody::new(file);
    Ok((headers, body).into_response())
}

/// Bring the site up to date with the filesystem before rendering. This is
/// a preview server, so we just redo it on every request.
fn refresh(state: &AppState) -> Result<(), HandlerError> {
    let mut ctx = state.ctx.write().unwrap_or_else(|e| e.into_inner());
    ctx.reload_posts().map_err(internal_error)?;
    // In debug mode, pick up template edits too.
    #[cfg(debug_assertions)]
    ctx.reload_templates().map_err(internal_error)?;
    Ok(())
}

fn internal_error(e: anyhow::Error) -> HandlerError {
    tracing::error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

async fn index(state: State<AppState>) -> Result<Response, HandlerError> {
    resource(state, Path(String::new())).await
}

/// Serve a resource from the site.
async fn resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, HandlerError> {
    tracing::debug!("GET /{path}");
    refresh(&state)?;

    let rsrc = {
        let ctx = state.ctx.read().unwrap_or_else(|e| e.into_inner());
        ctx.resolve_resource(&path)
    };
    if let Some(Resource::Static(src_path)) = &rsrc {
        return send_file(src_path).await;
    }

    let ctx = state.ctx.read().unwrap_or_else(|e| e.into_inner());
    let Some(rsrc) = rsrc else {
        return not_found(&ctx);
    };
    let content_type = match &rsrc {
        Resource::Sitemap => "application/xml",
        Resource::Robots => "text/plain; charset=utf-8",
        Resource::Asset(name) => mime_guess::from_path(name)
            .first_raw()
            .unwrap_or("text/plain"),
        Resource::Index | Resource::Post(_) | Resource::About | Resource::Static(_) => {
            "text/html; charset=utf-8"
        }
    };

    let mut buf: Vec<u8> = vec![];
    match ctx.render_resource(&rsrc, &mut buf) {
        Ok(true) => Ok(([(header::CONTENT_TYPE, content_type)], buf).into_response()),
        Ok(false) => not_found(&ctx),
        Err(e) => Err(internal_error(e)),
    }
}

fn not_found(ctx: &Context) -> Result<Response, HandlerError> {
    let mut buf: Vec<u8> = vec![];
    ctx.render_not_found(&mut buf).map_err(internal_error)?;
    Ok((StatusCode::NOT_FOUND, Html(buf)).into_response())
}

/// Server-Sent Events endpoint for getting change notifications.
async fn notify(
    State(state): State<AppState>,
) -> sse::Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let stream = state.watch.stream().map(|_| {
        tracing::debug!("sending reload event");
        Ok(sse::Event::default().event("reload").data("_"))
    });
    sse::Sse::new(stream)
}
