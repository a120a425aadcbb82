//! Deferred configuration resolution.
//!
//! A [`ConfigProvider`] is a recipe for a value: it holds a resolver that
//! runs against a runtime context once that context exists. Configuration
//! slots accept a [`ConfigValue`], which is either a plain value or a
//! provider of one.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::errors::MailResult;

type Resolver<C, T> = dyn Fn(&C) -> BoxFuture<'static, MailResult<T>> + Send + Sync;

/// Deferred value resolved against a context of type `C`.
///
/// The provider does not memoize: every call to [`ConfigProvider::resolve`]
/// runs the resolver again.
pub struct ConfigProvider<C, T> {
    resolver: Arc<Resolver<C, T>>,
}

impl<C, T> ConfigProvider<C, T> {
    /// Wraps a resolver.
    ///
    /// The resolver runs synchronously up to the returned future; anything it
    /// needs from the context must be copied out before the future is built.
    ///
    /// ```rust
    /// use integrations_mail::ConfigProvider;
    ///
    /// # tokio_test::block_on(async {
    /// let provider = ConfigProvider::create(|base: &u32| {
    ///     let base = *base;
    ///     async move { Ok(base * 2) }
    /// });
    /// assert_eq!(provider.resolve(&21).await.unwrap(), 42);
    /// # });
    /// ```
    pub fn create<F, Fut>(resolver: F) -> Self
    where
        C: 'static,
        T: 'static,
        F: Fn(&C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MailResult<T>> + Send + 'static,
    {
        Self {
            resolver: Arc::new(move |ctx: &C| resolver(ctx).boxed()),
        }
    }

    /// Runs the resolver against `ctx`.
    pub fn resolve(&self, ctx: &C) -> BoxFuture<'static, MailResult<T>> {
        (self.resolver)(ctx)
    }
}

impl<C, T> Clone for ConfigProvider<C, T> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<C, T> fmt::Debug for ConfigProvider<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigProvider").finish_non_exhaustive()
    }
}

/// A configuration slot: a plain value or a provider of one.
pub enum ConfigValue<C, T> {
    /// Value available up front.
    Value(T),
    /// Value produced later against the runtime context.
    Provider(ConfigProvider<C, T>),
}

impl<C, T> ConfigValue<C, T> {
    /// Returns true if this slot holds a provider.
    pub fn is_provider(&self) -> bool {
        matches!(self, ConfigValue::Provider(_))
    }

    /// Returns the plain value, or resolves the provider against `ctx`.
    pub fn into_resolved(self, ctx: &C) -> BoxFuture<'static, MailResult<T>>
    where
        T: Send + 'static,
    {
        match self {
            ConfigValue::Value(value) => futures::future::ready(Ok(value)).boxed(),
            ConfigValue::Provider(provider) => provider.resolve(ctx),
        }
    }
}

impl<C, T: Clone> Clone for ConfigValue<C, T> {
    fn clone(&self) -> Self {
        match self {
            ConfigValue::Value(value) => ConfigValue::Value(value.clone()),
            ConfigValue::Provider(provider) => ConfigValue::Provider(provider.clone()),
        }
    }
}

impl<C, T: fmt::Debug> fmt::Debug for ConfigValue<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            ConfigValue::Provider(provider) => f.debug_tuple("Provider").field(provider).finish(),
        }
    }
}

impl<C, T> From<ConfigProvider<C, T>> for ConfigValue<C, T> {
    fn from(provider: ConfigProvider<C, T>) -> Self {
        ConfigValue::Provider(provider)
    }
}

/// Resolves `candidate` if it is a provider.
///
/// Plain values yield `Ok(None)`: the caller keeps the value it already has.
pub async fn resolve<C, T>(ctx: &C, candidate: &ConfigValue<C, T>) -> MailResult<Option<T>> {
    match candidate {
        ConfigValue::Provider(provider) => provider.resolve(ctx).await.map(Some),
        ConfigValue::Value(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::MailError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_resolve_provider_runs_resolver() {
        let provider = ConfigProvider::create(|ctx: &String| {
            let greeting = format!("hello {}", ctx);
            async move { Ok(greeting) }
        });
        let value = ConfigValue::from(provider);

        let resolved = resolve(&"app".to_string(), &value).await.unwrap();
        assert_eq!(resolved.as_deref(), Some("hello app"));
    }

    #[tokio::test]
    async fn test_resolve_plain_value_returns_none() {
        let value: ConfigValue<(), u32> = ConfigValue::Value(7);
        assert_eq!(resolve(&(), &value).await.unwrap(), None);
        assert!(!value.is_provider());
    }

    #[tokio::test]
    async fn test_provider_does_not_memoize() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider = ConfigProvider::create(move |_: &()| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n) }
        });

        assert_eq!(provider.resolve(&()).await.unwrap(), 1);
        assert_eq!(provider.resolve(&()).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolver_error_propagates() {
        let provider: ConfigProvider<(), u32> = ConfigProvider::create(|_: &()| async {
            Err(MailError::configuration("secret unavailable"))
        });
        let err = resolve(&(), &ConfigValue::from(provider)).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_into_resolved_handles_both_variants() {
        let plain: ConfigValue<(), &str> = ConfigValue::Value("plain");
        assert_eq!(plain.into_resolved(&()).await.unwrap(), "plain");

        let deferred: ConfigValue<(), &str> =
            ConfigProvider::create(|_: &()| async { Ok("deferred") }).into();
        assert_eq!(deferred.into_resolved(&()).await.unwrap(), "deferred");
    }
}
