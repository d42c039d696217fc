use anyhow::Result;
use tracing::{info, warn};
use url::Url;

use super::session::{Transport, generated_token};

/// Walks the result pages of one year-scoped search.
pub struct Paginator<'a> {
    transport: &'a dyn Transport,
    base_url: &'a str,
    token: String,
}

impl<'a> Paginator<'a> {
    pub fn new(transport: &'a dyn Transport, base_url: &'a str, token: String) -> Self {
        Self {
            transport,
            base_url,
            token,
        }
    }

    #[cfg(test)]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Submits the quick-search form for `year` and returns the URL of the
    /// first results page. The search gets its own token, which then ties
    /// every follow-up page request to this search.
    pub fn search(&mut self, year: i32) -> Result<String> {
        let search_token = generated_token();
        let url = format!("{}/Terminal/Busca/RapidaLegislacao?bibliotecas=", self.base_url);
        let form = search_form(&search_token, year);

        info!(year, url = %url, "submitting search form");
        let response = self.transport.post_form(&url, &form)?;
        self.token = search_token;

        if response.is_redirect() {
            if let Some(location) = response.location.as_deref() {
                let redirect = join_url(self.base_url, location);
                info!(year, redirect = %redirect, "search redirected to results");
                return Ok(redirect);
            }
        }

        if !(200..400).contains(&response.status) {
            warn!(
                year,
                status = response.status,
                body_chars = response.body.len(),
                "search form returned non-success status"
            );
        }

        Ok(format!(
            "{}/Terminal/Resultado/ListarLegislacao?guid={}",
            self.base_url, self.token
        ))
    }

    /// Fetches result page `page` (1-based; page 1 comes from `search`).
    /// Returns `None` when the body is blank.
    pub fn next_page(&self, page: u32) -> Result<Option<String>> {
        let url = format!(
            "{}/Terminal/Resultado/CarregarPaginaLayoutDetalhe",
            self.base_url
        );
        let query = [
            ("paginaInicial", page.to_string()),
            ("guid", self.token.clone()),
        ];

        let body = self.transport.post_xhr(&url, &query)?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(body))
    }
}

fn search_form(token: &str, year: i32) -> Vec<(&'static str, String)> {
    vec![
        ("Guid", token.to_string()),
        ("TipoBuscaRapida", "0".to_string()),
        ("IniciadoCom", "false".to_string()),
        ("PalavraChave", String::new()),
        ("ValidacaoLegislacao", String::new()),
        ("CodigosNorma", String::new()),
        ("Numero", String::new()),
        ("Ano", year.to_string()),
        ("CodigosOrgao", String::new()),
    ]
}

fn join_url(base_url: &str, location: &str) -> String {
    Url::parse(base_url)
        .and_then(|base| base.join(location))
        .map(String::from)
        .unwrap_or_else(|_| format!("{base_url}{location}"))
}
