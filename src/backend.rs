use crate::config::ServerConfig;
use crate::document::DocumentStore;
use crate::hover::{handle_hover, HoverResolver};
use std::sync::{Arc, OnceLock};
use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, warn};

pub struct Backend {
    client: Client,
    documents: Arc<DocumentStore>,
    // Built in `initialize`, once the client's options are known.
    resolver: OnceLock<Arc<HoverResolver>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            documents: Arc::new(DocumentStore::new()),
            resolver: OnceLock::new(),
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        // Parse server config from initializationOptions
        let config = params
            .initialization_options
            .map(ServerConfig::from_value)
            .unwrap_or_default();

        info!("package-version-server initializing with config: {config:?}");

        let resolver = HoverResolver::new(&config).map_err(|e| {
            let mut err = Error::internal_error();
            err.message = e.to_string().into();
            err
        })?;
        if self.resolver.set(Arc::new(resolver)).is_err() {
            warn!("initialize received twice, keeping the first configuration");
        }

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "package-version-server".into(),
                version: Some(env!("CARGO_PKG_VERSION").into()),
            }),
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        info!("package-version-server ready");
        self.client
            .log_message(MessageType::INFO, "package-version-server initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        // In-flight registry lookups keep running; only new hovers are refused
        if let Some(resolver) = self.resolver.get() {
            resolver.shutdown();
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        self.documents
            .open(uri.clone(), version, params.text_document.text);
        debug!("did_open: {uri}");
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        debug!("did_change: {uri} v{version}");

        if let Err(e) = self.documents.update(&uri, version, params.content_changes) {
            self.client
                .log_message(
                    MessageType::ERROR,
                    format!("Failed to update document: {e}"),
                )
                .await;
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = &params.text_document.uri;
        debug!("did_close: {uri}");
        self.documents.close(uri);
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let Some(resolver) = self.resolver.get() else {
            return Ok(None);
        };
        Ok(handle_hover(&self.documents, resolver, params).await)
    }
}
