//! Per-tenant keyword tables, tenant routing, and hand-off terms.
//!
//! Matching is done on normalized text: lower-cased with diacritics removed,
//! so "Seminário" and "seminario" hit the same keyword. Keywords are
//! normalized once when the book is prepared.

use std::path::Path;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::ConfigError;

/// Case-fold and strip diacritics.
pub fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// One `(keyword-set, tag)` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRule {
    /// Substring keywords; any hit selects the rule.
    #[serde(default, rename = "match")]
    pub keywords: Vec<String>,
    /// Terms that must equal the whole (trimmed) message, e.g. menu digits.
    #[serde(default)]
    pub exact: Vec<String>,
    pub tag: String,
    /// Scripted reply sent while the conversation carries this tag.
    #[serde(default)]
    pub reply: Option<String>,
}

impl TagRule {
    /// Test normalized text against this rule.
    pub fn matches(&self, normalized: &str) -> bool {
        let trimmed = normalized.trim();
        self.exact.iter().any(|term| term == trimmed)
            || self
                .keywords
                .iter()
                .any(|kw| !kw.is_empty() && normalized.contains(kw.as_str()))
    }
}

/// A tenant: its welcome menu and ordered rule table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub id: String,
    pub name: String,
    pub welcome: String,
    #[serde(default)]
    pub rules: Vec<TagRule>,
    /// Reply for tags that carry no script of their own.
    #[serde(default)]
    pub fallback_reply: Option<String>,
}

/// Keywords that route a first-contact message to a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRoute {
    #[serde(rename = "match")]
    pub keywords: Vec<String>,
    pub tenant: String,
}

/// Terms that request a human operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRules {
    #[serde(default = "default_handoff_keywords", rename = "match")]
    pub keywords: Vec<String>,
}

fn default_handoff_keywords() -> Vec<String> {
    vec!["atendente".into(), "humano".into()]
}

impl Default for HandoffRules {
    fn default() -> Self {
        Self {
            keywords: default_handoff_keywords(),
        }
    }
}

/// The full triage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBook {
    pub tenants: Vec<TenantProfile>,
    #[serde(default)]
    pub routes: Vec<TenantRoute>,
    pub fallback_tenant: String,
    #[serde(default)]
    pub handoff: HandoffRules,
}

impl RuleBook {
    /// Parse a JSON rule book and prepare it for matching.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let book: RuleBook = serde_json::from_str(json)
            .map_err(|e| ConfigError::ParseError(format!("rule book: {e}")))?;
        book.prepare()
    }

    /// Read a JSON rule book from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Single-tenant book used when no rule file is configured.
    pub fn builtin() -> Self {
        let rule = |keywords: &[&str], exact: &str, tag: &str, reply: &str| TagRule {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            exact: vec![exact.to_string()],
            tag: tag.to_string(),
            reply: Some(reply.to_string()),
        };

        let book = Self {
            tenants: vec![TenantProfile {
                id: "default".into(),
                name: "{bot}".into(),
                welcome: "Olá! 😊 Eu sou o *{bot}*.\n\n\
                          Me diga o que você precisa:\n\
                          1) 📚 Cursos\n\
                          2) 🛒 Vendas\n\
                          3) 🛠️ Suporte\n\
                          4) 💳 Financeiro\n\n\
                          Responda com 1, 2, 3 ou 4.\n\
                          Se preferir atendimento humano, digite *atendente*."
                    .into(),
                rules: vec![
                    rule(
                        &["curso", "turma"],
                        "1",
                        "cursos",
                        "📚 *Cursos*\nMe diga:\n• Qual curso/turma você quer?\n• Seu nome\n• Seu WhatsApp (se for outro número)",
                    ),
                    rule(
                        &["comprar", "venda", "produto"],
                        "2",
                        "vendas",
                        "🛒 *Vendas*\nMe diga:\n• Qual produto você quer\n• Sua cidade\n• Forma de pagamento (Pix/Cartão)",
                    ),
                    rule(
                        &["suporte", "problema", "erro"],
                        "3",
                        "suporte",
                        "🛠️ *Suporte*\nDescreva o problema e, se puder, mande print.\nSe quiser atendimento humano, digite *atendente*.",
                    ),
                    rule(
                        &["pagamento", "pix", "boleto"],
                        "4",
                        "financeiro",
                        "💳 *Financeiro*\nVocê precisa de:\n1) Pix\n2) Boleto\n3) Cartão\n\nResponda com 1, 2 ou 3.",
                    ),
                ],
                fallback_reply: Some(
                    "Não entendi 😅. Digite *atendente* ou diga *curso / vendas / suporte / financeiro*."
                        .into(),
                ),
            }],
            routes: Vec::new(),
            fallback_tenant: "default".into(),
            handoff: HandoffRules::default(),
        };

        // Built-in tables are static and already valid.
        book.normalized()
    }

    /// Validate references and normalize every keyword.
    fn prepare(self) -> Result<Self, ConfigError> {
        if self.tenants.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "tenants".into(),
                message: "rule book defines no tenants".into(),
            });
        }
        if self.tenant(&self.fallback_tenant).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "fallback_tenant".into(),
                message: format!("unknown tenant '{}'", self.fallback_tenant),
            });
        }
        if let Some(route) = self.routes.iter().find(|r| self.tenant(&r.tenant).is_none()) {
            return Err(ConfigError::InvalidValue {
                key: "routes".into(),
                message: format!("route targets unknown tenant '{}'", route.tenant),
            });
        }
        Ok(self.normalized())
    }

    fn normalized(mut self) -> Self {
        let norm_all = |terms: &mut Vec<String>| {
            for term in terms.iter_mut() {
                *term = normalize(term.trim());
            }
        };
        for tenant in &mut self.tenants {
            for rule in &mut tenant.rules {
                norm_all(&mut rule.keywords);
                norm_all(&mut rule.exact);
            }
        }
        for route in &mut self.routes {
            norm_all(&mut route.keywords);
        }
        norm_all(&mut self.handoff.keywords);
        self
    }

    /// Look up a tenant by id.
    pub fn tenant(&self, id: &str) -> Option<&TenantProfile> {
        self.tenants.iter().find(|t| t.id == id)
    }

    /// Replace `{bot}` in every prompt text.
    pub fn with_bot_name(mut self, bot_name: &str) -> Self {
        for tenant in &mut self.tenants {
            tenant.name = tenant.name.replace("{bot}", bot_name);
            tenant.welcome = tenant.welcome.replace("{bot}", bot_name);
        }
        self
    }
}
