//! Tests for `src/bot/registry.rs` and bot descriptors.

use std::sync::Arc;

use async_trait::async_trait;

use hg_bot::bot::{Bot, BotRegistry, RegistryError, Router, User, UserResolver};
use hg_bot::request::Request;

struct NullRouter;

#[async_trait]
impl Router for NullRouter {
    async fn handle(&self, _request: Request) -> anyhow::Result<()> {
        Ok(())
    }
}

struct NoUsers;

#[async_trait]
impl UserResolver for NoUsers {
    async fn resolve(&self, platform_id: &str) -> anyhow::Result<User> {
        anyhow::bail!("no user {platform_id}")
    }
}

fn bot(id: &str) -> Bot {
    Bot::new(id, Arc::new(NullRouter), Arc::new(NoUsers))
}

#[test]
fn registered_bot_is_found_by_id() {
    let mut registry = BotRegistry::new();
    registry.register(bot("NewsBot")).expect("register");
    let found = registry.get("NewsBot").expect("bot should be found");
    assert_eq!(found.id(), "NewsBot");
    assert_eq!(found.namespace(), "news_bots");
}

#[test]
fn unknown_id_is_not_found() {
    let registry = BotRegistry::new();
    assert!(matches!(
        registry.get("Ghost"),
        Err(RegistryError::NotFound(id)) if id == "Ghost"
    ));
}

#[test]
fn duplicate_ids_are_rejected() {
    let mut registry = BotRegistry::new();
    registry.register(bot("NewsBot")).expect("register");
    assert!(matches!(
        registry.register(bot("NewsBot")),
        Err(RegistryError::Duplicate(_))
    ));
    assert_eq!(registry.len(), 1);
}

#[test]
fn ids_are_sorted() {
    let mut registry = BotRegistry::new();
    for id in ["WeatherBot", "AlertBot", "NewsBot"] {
        registry.register(bot(id)).expect("register");
    }
    assert_eq!(registry.ids(), vec!["AlertBot", "NewsBot", "WeatherBot"]);
}

#[test]
fn explicit_namespace_overrides_derived_one() {
    let bot = bot("NewsBot").with_namespace("headlines");
    assert_eq!(bot.namespace(), "headlines");
}

#[test]
fn debug_output_redacts_access_token() {
    let bot = bot("NewsBot").with_access_token("EAAB-secret-token");
    assert_eq!(bot.access_token(), Some("EAAB-secret-token"));
    let debug = format!("{bot:?}");
    assert!(!debug.contains("EAAB-secret-token"));
    assert!(debug.contains("[REDACTED]"));
}
