//! Directory connections and client lifecycle.
//!
//! The [`ConnectionFactory`] dials raw connections; the [`ClientFactory`]
//! hands out ready-to-use clients and reclaims them. Two acquisition paths
//! exist: the default path, which may reuse a pooled service-account
//! client, and the override path (specific bind identity or target
//! address), which always dials a dedicated short-lived client. Release
//! behavior differs accordingly: pool-owned clients are returned, request-
//! owned clients are closed.
//!
//! ## Security
//!
//! Per-user binds are never pooled. A client bound as an end user is
//! discarded on release so a later request can never inherit its identity.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::{DirectoryAddress, LdapConfig};
use crate::error::{LdapError, LdapResult};
use crate::features::{self, SupportedFeatures};

// ============================================================================
// Dial Options
// ============================================================================

/// A bind identity override for a dialed connection.
#[derive(Clone)]
pub struct BindIdentity {
    /// DN to bind as.
    pub dn: String,

    /// Bind password.
    pub password: String,
}

impl fmt::Debug for BindIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindIdentity")
            .field("dn", &self.dn)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Options for acquiring a client.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    address: Option<DirectoryAddress>,
    bind: Option<BindIdentity>,
}

impl DialOptions {
    /// Default acquisition: configured address, service-account bind.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquisition against a different server, as used for referral
    /// chasing. The service account credentials are still used.
    #[must_use]
    pub fn at_address(address: DirectoryAddress) -> Self {
        Self {
            address: Some(address),
            bind: None,
        }
    }

    /// Acquisition bound as a specific end user.
    #[must_use]
    pub fn bind_as(dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: None,
            bind: Some(BindIdentity {
                dn: dn.into(),
                password: password.into(),
            }),
        }
    }

    /// True when neither the address nor the bind identity is overridden.
    #[must_use]
    pub const fn is_default(&self) -> bool {
        self.address.is_none() && self.bind.is_none()
    }

    /// Returns the address override, if any.
    #[must_use]
    pub const fn address(&self) -> Option<&DirectoryAddress> {
        self.address.as_ref()
    }
}

// ============================================================================
// Connection Factory
// ============================================================================

/// Dials raw directory connections. Stateless.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    config: Arc<LdapConfig>,
    address: DirectoryAddress,
}

impl ConnectionFactory {
    /// Creates a factory for the configured directory address.
    pub fn new(config: Arc<LdapConfig>) -> LdapResult<Self> {
        let address = config.address()?;
        Ok(Self { config, address })
    }

    /// Returns the configured directory address.
    #[must_use]
    pub const fn address(&self) -> &DirectoryAddress {
        &self.address
    }

    /// Dials a connection and performs the initial bind.
    ///
    /// ## Errors
    ///
    /// Network and TLS failures are wrapped with the target address. A bind
    /// override rejected with invalid credentials surfaces as
    /// [`LdapError::InvalidCredentials`] so the caller can distinguish a bad
    /// password from an unreachable server.
    pub async fn dial(&self, options: &DialOptions) -> LdapResult<Ldap> {
        // An empty password would turn a simple bind into an RFC 4513
        // unauthenticated bind, which most directories accept as anonymous.
        if let Some(identity) = &options.bind {
            if identity.password.is_empty() {
                return Err(LdapError::InvalidCredentials);
            }
        }

        let address = options.address.as_ref().unwrap_or(&self.address);

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.config.connect_timeout)
            .set_starttls(self.config.tls.start_tls)
            .set_no_tls_verify(self.config.tls.skip_verify);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &address.url())
            .await
            .map_err(|e| LdapError::connection(address.url(), e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!("directory connection driver error: {e}");
            }
        });

        let bind = match &options.bind {
            Some(identity) => Some((identity.dn.as_str(), identity.password.as_str())),
            None if !self.config.bind_dn.is_empty() => {
                Some((self.config.bind_dn.as_str(), self.config.bind_password.as_str()))
            }
            None => None,
        };

        if let Some((dn, password)) = bind {
            let result = ldap
                .simple_bind(dn, password)
                .await
                .map_err(|e| LdapError::bind(address.url(), e.to_string()))?;

            match result.rc {
                0 => {}
                crate::password::RC_INVALID_CREDENTIALS if options.bind.is_some() => {
                    let _ = ldap.unbind().await;
                    return Err(LdapError::InvalidCredentials);
                }
                rc => {
                    let _ = ldap.unbind().await;
                    return Err(LdapError::bind(
                        address.url(),
                        format!("result code {rc}: {}", result.text),
                    ));
                }
            }
        }

        Ok(ldap)
    }
}

// ============================================================================
// Directory Client
// ============================================================================

/// Who owns a checked-out client, and therefore what release does with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOwner {
    /// Owned by the pool; release returns it to the idle set.
    Pool,

    /// Owned by the request; release closes it.
    Request,
}

/// An open directory client checked out from a [`ClientFactory`].
///
/// A client serves exactly one logical operation sequence and must be
/// released on every exit path. It is never shared between requests.
pub struct DirectoryClient {
    ldap: Ldap,
    address: DirectoryAddress,
    owner: ClientOwner,
    _permit: Option<OwnedSemaphorePermit>,
}

impl DirectoryClient {
    /// Returns a mutable handle for protocol operations.
    pub fn ldap_mut(&mut self) -> &mut Ldap {
        &mut self.ldap
    }

    /// Returns the address this client is connected to.
    #[must_use]
    pub const fn address(&self) -> &DirectoryAddress {
        &self.address
    }

    /// Returns true for pool-owned clients.
    #[must_use]
    pub fn is_pool_owned(&self) -> bool {
        self.owner == ClientOwner::Pool
    }

    async fn unbind(mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!("unbind on discard failed: {e}");
        }
    }
}

impl fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("address", &self.address)
            .field("owner", &self.owner)
            .finish()
    }
}

// ============================================================================
// Idle Set
// ============================================================================

/// A pooled client waiting for reuse.
struct Idle<T> {
    client: T,
    since: Instant,
}

/// The bounded idle set behind the pooled factory.
///
/// Accessors serialize through the factory's mutex; eviction happens lazily
/// on checkout.
struct IdleSet<T> {
    clients: Vec<Idle<T>>,
    max_idle_time: Duration,
}

impl<T> IdleSet<T> {
    fn new(max_idle_time: Duration) -> Self {
        Self {
            clients: Vec::new(),
            max_idle_time,
        }
    }

    /// Takes the freshest idle client, returning it together with every
    /// client that aged out and must be closed by the caller.
    fn checkout(&mut self, now: Instant) -> (Option<T>, Vec<T>) {
        let mut expired = Vec::new();
        let mut kept = Vec::new();

        for idle in self.clients.drain(..) {
            if now.duration_since(idle.since) >= self.max_idle_time {
                expired.push(idle.client);
            } else {
                kept.push(idle);
            }
        }

        self.clients = kept;
        let reused = self.clients.pop().map(|idle| idle.client);
        (reused, expired)
    }

    fn checkin(&mut self, client: T, now: Instant) {
        self.clients.push(Idle { client, since: now });
    }

    fn drain(&mut self) -> Vec<T> {
        self.clients.drain(..).map(|idle| idle.client).collect()
    }

    fn len(&self) -> usize {
        self.clients.len()
    }
}

// ============================================================================
// Client Factory
// ============================================================================

/// The pooled acquisition machinery.
struct Pool {
    semaphore: Arc<Semaphore>,
    idle: Mutex<IdleSet<Ldap>>,
}

enum FactoryMode {
    /// Dial on every acquisition, close on every release.
    Standard,

    /// Reuse service-account clients through a bounded idle set.
    Pooled(Pool),
}

/// Hands out directory clients and reclaims them.
///
/// Feature discovery runs once in [`initialize`](Self::initialize); the
/// result lives on the factory for its whole lifetime and is read without
/// locking.
pub struct ClientFactory {
    connections: ConnectionFactory,
    mode: FactoryMode,
    features: OnceLock<SupportedFeatures>,
}

impl ClientFactory {
    /// Creates a factory in the mode selected by the configuration.
    pub fn new(config: Arc<LdapConfig>) -> LdapResult<Self> {
        let mode = if config.pooling.enabled {
            FactoryMode::Pooled(Pool {
                semaphore: Arc::new(Semaphore::new(config.pooling.max_size)),
                idle: Mutex::new(IdleSet::new(config.pooling.max_idle_time)),
            })
        } else {
            FactoryMode::Standard
        };

        Ok(Self {
            connections: ConnectionFactory::new(config)?,
            mode,
            features: OnceLock::new(),
        })
    }

    /// Returns the configured directory address.
    #[must_use]
    pub const fn address(&self) -> &DirectoryAddress {
        self.connections.address()
    }

    /// Performs feature discovery once and caches the result.
    ///
    /// Later calls keep the first discovery; the cache is refreshed only by
    /// constructing a new factory.
    pub async fn initialize(&self) -> LdapResult<()> {
        if self.features.get().is_some() {
            return Ok(());
        }

        let mut client = self.get_client(&DialOptions::new()).await?;
        let discovered =
            features::discover(client.ldap_mut(), &self.address().url()).await;
        self.release(client).await;

        let _ = self.features.set(discovered?);
        Ok(())
    }

    /// Returns the discovered features.
    ///
    /// ## Errors
    ///
    /// Fails with [`LdapError::NotInitialized`] before
    /// [`initialize`](Self::initialize) has completed.
    pub fn features(&self) -> LdapResult<&SupportedFeatures> {
        self.features.get().ok_or(LdapError::NotInitialized)
    }

    /// Acquires a client.
    ///
    /// Default options may reuse a pooled service-account client; any
    /// override dials a dedicated request-owned client.
    pub async fn get_client(&self, options: &DialOptions) -> LdapResult<DirectoryClient> {
        if !options.is_default() {
            let ldap = self.connections.dial(options).await?;
            let address = options
                .address()
                .unwrap_or(self.connections.address())
                .clone();
            return Ok(DirectoryClient {
                ldap,
                address,
                owner: ClientOwner::Request,
                _permit: None,
            });
        }

        match &self.mode {
            FactoryMode::Standard => {
                let ldap = self.connections.dial(options).await?;
                Ok(DirectoryClient {
                    ldap,
                    address: self.connections.address().clone(),
                    owner: ClientOwner::Request,
                    _permit: None,
                })
            }
            FactoryMode::Pooled(pool) => {
                let permit = pool
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| LdapError::PoolExhausted)?;

                let (reused, expired) = {
                    let mut idle = pool.idle.lock().await;
                    idle.checkout(Instant::now())
                };

                for mut ldap in expired {
                    debug!("closing idle directory client past max idle time");
                    let _ = ldap.unbind().await;
                }

                let ldap = match reused {
                    Some(ldap) => ldap,
                    None => self.connections.dial(options).await?,
                };

                Ok(DirectoryClient {
                    ldap,
                    address: self.connections.address().clone(),
                    owner: ClientOwner::Pool,
                    _permit: Some(permit),
                })
            }
        }
    }

    /// Releases a client.
    ///
    /// Pool-owned clients return to the idle set; request-owned clients are
    /// closed.
    pub async fn release(&self, client: DirectoryClient) {
        match (&self.mode, client.owner) {
            (FactoryMode::Pooled(pool), ClientOwner::Pool) => {
                if pool.semaphore.is_closed() {
                    client.unbind().await;
                    return;
                }
                let DirectoryClient { ldap, .. } = client;
                let mut idle = pool.idle.lock().await;
                idle.checkin(ldap, Instant::now());
            }
            _ => client.unbind().await,
        }
    }

    /// Drains and closes all pooled clients. The factory hands out no
    /// pooled clients afterwards.
    pub async fn close(&self) {
        if let FactoryMode::Pooled(pool) = &self.mode {
            pool.semaphore.close();
            let drained = {
                let mut idle = pool.idle.lock().await;
                idle.drain()
            };
            for mut ldap in drained {
                let _ = ldap.unbind().await;
            }
        }
    }

    /// Number of idle pooled clients, for diagnostics.
    pub async fn idle_clients(&self) -> usize {
        match &self.mode {
            FactoryMode::Standard => 0,
            FactoryMode::Pooled(pool) => pool.idle.lock().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_have_no_overrides() {
        let options = DialOptions::new();
        assert!(options.is_default());
        assert!(options.address().is_none());
    }

    #[test]
    fn overrides_are_not_default() {
        let address = DirectoryAddress::parse("ldap://other.example.com").unwrap();
        assert!(!DialOptions::at_address(address).is_default());
        assert!(!DialOptions::bind_as("uid=jdoe", "secret").is_default());
    }

    #[test]
    fn bind_identity_debug_redacts_password() {
        let identity = BindIdentity {
            dn: "uid=jdoe,dc=example,dc=com".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{identity:?}");
        assert!(rendered.contains("uid=jdoe"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn idle_set_checkout_prefers_fresh_and_reports_expired() {
        let max_idle = Duration::from_secs(60);
        let mut set = IdleSet::new(max_idle);
        let start = Instant::now();

        set.checkin(1_u32, start);
        let now = start + Duration::from_secs(120);
        set.checkin(2_u32, now);

        let (reused, expired) = set.checkout(now);
        assert_eq!(reused, Some(2));
        assert_eq!(expired, vec![1]);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn idle_set_never_exceeds_checked_in_count() {
        let mut set = IdleSet::new(Duration::from_secs(60));
        let now = Instant::now();

        // Sequential acquire/release cycles with a bound of one client.
        for _ in 0..10 {
            let (reused, expired) = set.checkout(now);
            assert!(expired.is_empty());
            let client = reused.unwrap_or(7_u32);
            set.checkin(client, now);
            assert!(set.len() <= 1);
        }
    }

    #[test]
    fn idle_set_drain_empties() {
        let mut set = IdleSet::new(Duration::from_secs(60));
        let now = Instant::now();
        set.checkin(1_u32, now);
        set.checkin(2_u32, now);

        let drained = set.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(set.len(), 0);
    }
}
