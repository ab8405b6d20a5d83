use std::sync::Arc;

use commons_authz::{MembershipReader, PermissionResolver};
use commons_store::{AuthzStore, InMemoryAuthzStore, resolver_for};

#[cfg(feature = "postgres")]
use commons_store::PostgresAuthzStore;

/// The store and resolver shared by all handlers.
///
/// No grant state is cached here: every check reads the store, so a grant
/// change takes effect on the very next request.
pub struct AppServices {
    pub store: Arc<dyn AuthzStore>,
    pub ledger: Arc<dyn MembershipReader>,
    pub resolver: PermissionResolver,
}

pub async fn build_services() -> AppServices {
    #[cfg(feature = "postgres")]
    {
        let use_postgres = std::env::var("USE_POSTGRES_STORE")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        if use_postgres {
            match std::env::var("DATABASE_URL") {
                Ok(url) => match PostgresAuthzStore::connect(&url).await {
                    Ok(store) => {
                        let store = Arc::new(store);
                        return AppServices {
                            store: store.clone(),
                            ledger: store.clone(),
                            resolver: resolver_for(store),
                        };
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "postgres connection failed, falling back to in-memory");
                    }
                },
                Err(_) => {
                    tracing::warn!("USE_POSTGRES_STORE=true but DATABASE_URL not set, falling back to in-memory");
                }
            }
        }
    }

    let store = Arc::new(InMemoryAuthzStore::new());
    AppServices {
        store: store.clone(),
        ledger: store.clone(),
        resolver: resolver_for(store),
    }
}
