//! Directory authentication provider.
//!
//! The façade behind the [`UserBackend`] contract. Construction resolves
//! the filter templates and validates configuration; [`startup_check`]
//! performs feature discovery and a connectivity probe and is fatal on
//! failure. Once ready, every public operation independently acquires a
//! client, runs its protocol sequence, and releases the client on every
//! exit path.
//!
//! ## Security
//!
//! - Passwords are never logged.
//! - Credential checks bind as the resolved user DN on a dedicated client
//!   that is closed afterwards, never returned to the pool.
//! - All request input is escaped before it reaches a search filter.
//!
//! [`startup_check`]: LdapUserBackend::startup_check

use std::sync::Arc;

use chrono::Utc;
use janus_authn::{
    AuthenticationError, AuthenticationResult, ExtendedUserDetails, UserBackend, UserDetails,
};
use ldap3::{Scope, SearchEntry, SearchResult};
use tracing::debug;

use crate::config::LdapConfig;
use crate::connection::{ClientFactory, DialOptions, DirectoryClient};
use crate::error::{LdapError, LdapResult};
use crate::filter::FilterTemplate;
use crate::groups;
use crate::password::{self, MutationStrategy};
use crate::profile::{ProfileMapper, UserProfile};
use crate::referral;

/// LDAP implementation of the identity backend contract.
pub struct LdapUserBackend {
    config: Arc<LdapConfig>,
    factory: ClientFactory,
    mapper: ProfileMapper,
    users_filter: FilterTemplate,
    groups_filter: FilterTemplate,
    users_base_dn: String,
    groups_base_dn: String,
}

impl LdapUserBackend {
    /// Creates the provider from a validated configuration.
    ///
    /// Filter templates are resolved here, once: afterwards they contain
    /// only value placeholders.
    pub fn new(config: LdapConfig) -> LdapResult<Self> {
        config.validate()?;

        let users_filter = FilterTemplate::resolve(&config.users_filter, &config.attributes);
        let groups_filter = FilterTemplate::resolve(&config.groups_filter, &config.attributes);
        let users_base_dn = config.users_base_dn();
        let groups_base_dn = config.groups_base_dn();
        let mapper = ProfileMapper::new(config.attributes.clone());

        let config = Arc::new(config);
        let factory = ClientFactory::new(Arc::clone(&config))?;

        Ok(Self {
            config,
            factory,
            mapper,
            users_filter,
            groups_filter,
            users_base_dn,
            groups_base_dn,
        })
    }

    /// Returns the resolved users filter template.
    #[must_use]
    pub fn users_filter(&self) -> &FilterTemplate {
        &self.users_filter
    }

    /// Returns the resolved groups filter template.
    #[must_use]
    pub fn groups_filter(&self) -> &FilterTemplate {
        &self.groups_filter
    }

    /// Runs a subtree search, chasing referrals when permitted.
    ///
    /// Each referral is chased sequentially on a dedicated client against
    /// the referred server and merged into the result, deduplicated by DN.
    /// Any chase failure aborts the whole operation.
    async fn search_with_referrals(
        &self,
        client: &mut DirectoryClient,
        base: &str,
        filter: &str,
        attrs: &[String],
        operation: &'static str,
    ) -> LdapResult<Vec<SearchEntry>> {
        let timeout = self.config.operation_timeout;
        let address = client.address().url();

        let SearchResult(entries, result) = client
            .ldap_mut()
            .with_timeout(timeout)
            .search(base, Scope::Subtree, filter, attrs)
            .await
            .map_err(|e| LdapError::connection(address.clone(), e.to_string()))?;

        match result.rc {
            0 => Ok(entries.into_iter().map(SearchEntry::construct).collect()),
            referral::RC_REFERRAL
                if self.config.permit_referrals && !result.refs.is_empty() =>
            {
                let mut accumulated: Vec<SearchEntry> =
                    entries.into_iter().map(SearchEntry::construct).collect();

                for referral_url in &result.refs {
                    let address = referral::referral_address(referral_url)?;
                    debug!(%address, operation, "chasing referral");

                    let mut chased = self
                        .factory
                        .get_client(&DialOptions::at_address(address.clone()))
                        .await
                        .map_err(|e| LdapError::referral(address.url(), e.to_string()))?;

                    let outcome = chased
                        .ldap_mut()
                        .with_timeout(timeout)
                        .search(base, Scope::Subtree, filter, attrs)
                        .await;
                    self.factory.release(chased).await;

                    let (chased_entries, _result) = outcome
                        .and_then(SearchResult::success)
                        .map_err(|e| LdapError::referral(address.url(), e.to_string()))?;

                    referral::merge_entries(
                        &mut accumulated,
                        chased_entries
                            .into_iter()
                            .map(SearchEntry::construct)
                            .collect(),
                    );
                }

                Ok(accumulated)
            }
            rc => Err(LdapError::Operation {
                operation,
                address,
                rc,
                message: result.text,
            }),
        }
    }

    /// Looks up exactly one user entry for the given request input.
    async fn find_user_entry(
        &self,
        client: &mut DirectoryClient,
        input: &str,
        extended: bool,
    ) -> LdapResult<SearchEntry> {
        let filter = self.users_filter.resolve_user_query(input, Utc::now());
        let attrs = if extended {
            self.mapper.attributes().extended_attributes()
        } else {
            self.mapper.attributes().profile_attributes()
        };

        let mut entries = self
            .search_with_referrals(client, &self.users_base_dn, &filter, &attrs, "user search")
            .await?;

        match entries.len() {
            0 => Err(LdapError::UserNotFound(input.to_string())),
            1 => Ok(entries.remove(0)),
            n => Err(LdapError::Ambiguous {
                username: input.to_string(),
                message: format!("{n} entries matched the users filter"),
            }),
        }
    }

    /// Resolves the group names for a retrieved profile.
    async fn resolve_groups(
        &self,
        client: &mut DirectoryClient,
        input: &str,
        profile: &UserProfile,
    ) -> LdapResult<Vec<String>> {
        let filter = self.groups_filter.resolve_group_query(
            input,
            &profile.username,
            &profile.dn,
            &profile.member_of,
            Utc::now(),
        );
        let attrs = vec![self.mapper.attributes().group_name.clone()];

        let entries = self
            .search_with_referrals(
                client,
                &self.groups_base_dn,
                &filter,
                &attrs,
                "group search",
            )
            .await?;

        Ok(groups::resolve_group_names(
            self.config.group_search_mode,
            &entries,
            &profile.member_of,
            &self.mapper.attributes().group_name,
        ))
    }

    async fn check_password_sequence(
        &self,
        username: &str,
        password: &str,
    ) -> LdapResult<bool> {
        // An empty password would be an unauthenticated bind, which many
        // directories accept as anonymous. Refuse it outright.
        if password.is_empty() {
            return Ok(false);
        }

        let mut client = self.factory.get_client(&DialOptions::new()).await?;
        let outcome = self.find_user_entry(&mut client, username, false).await;
        self.factory.release(client).await;
        let profile = self.mapper.map_profile(&outcome?)?;

        match self
            .factory
            .get_client(&DialOptions::bind_as(&profile.dn, password))
            .await
        {
            Ok(user_client) => {
                self.factory.release(user_client).await;
                Ok(true)
            }
            Err(LdapError::InvalidCredentials) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn details_sequence(&self, username: &str) -> LdapResult<UserDetails> {
        let mut client = self.factory.get_client(&DialOptions::new()).await?;
        let outcome = async {
            let entry = self.find_user_entry(&mut client, username, false).await?;
            let profile = self.mapper.map_profile(&entry)?;
            let groups = self.resolve_groups(&mut client, username, &profile).await?;
            Ok(profile.into_details(groups))
        }
        .await;
        self.factory.release(client).await;
        outcome
    }

    async fn extended_details_sequence(
        &self,
        username: &str,
    ) -> LdapResult<ExtendedUserDetails> {
        let mut client = self.factory.get_client(&DialOptions::new()).await?;
        let outcome = async {
            let entry = self.find_user_entry(&mut client, username, true).await?;
            let extended = self.mapper.map_extended_profile(&entry)?;
            let groups = self
                .resolve_groups(&mut client, username, &extended.profile)
                .await?;
            Ok(extended.into_details(groups))
        }
        .await;
        self.factory.release(client).await;
        outcome
    }

    /// Applies a password mutation for the user, chasing a referral
    /// response when permitted.
    async fn mutate_password_sequence(
        &self,
        username: &str,
        old_password: Option<&str>,
        new_password: &str,
        strategy: MutationStrategy,
    ) -> LdapResult<()> {
        let mut client = self.factory.get_client(&DialOptions::new()).await?;
        let outcome = async {
            let entry = self.find_user_entry(&mut client, username, false).await?;
            let profile = self.mapper.map_profile(&entry)?;

            let result = password::apply_mutation(
                client.ldap_mut(),
                strategy,
                &profile.dn,
                old_password,
                new_password,
            )
            .await?;

            match result.rc {
                0 => Ok(()),
                referral::RC_REFERRAL
                    if self.config.permit_referrals && !result.refs.is_empty() =>
                {
                    self.chase_mutation_referrals(
                        &result.refs,
                        &profile.dn,
                        old_password,
                        new_password,
                        strategy,
                    )
                    .await
                }
                rc => Err(password::classify_mutation_failure(
                    "password modify",
                    &client.address().url(),
                    rc,
                    &result.text,
                )),
            }
        }
        .await;
        self.factory.release(client).await;
        outcome
    }

    /// Repeats a password mutation against each referred server.
    async fn chase_mutation_referrals(
        &self,
        referrals: &[String],
        user_dn: &str,
        old_password: Option<&str>,
        new_password: &str,
        strategy: MutationStrategy,
    ) -> LdapResult<()> {
        for referral_url in referrals {
            let address = referral::referral_address(referral_url)?;
            debug!(%address, "chasing password modify referral");

            let mut chased = self
                .factory
                .get_client(&DialOptions::at_address(address.clone()))
                .await
                .map_err(|e| LdapError::referral(address.url(), e.to_string()))?;

            let outcome = password::apply_mutation(
                chased.ldap_mut(),
                strategy,
                user_dn,
                old_password,
                new_password,
            )
            .await;
            self.factory.release(chased).await;

            let result =
                outcome.map_err(|e| LdapError::referral(address.url(), e.to_string()))?;
            if result.rc != 0 {
                // Policy rejections keep their class even through a
                // referral; everything else is a chase failure naming the
                // referred server.
                let classified = password::classify_mutation_failure(
                    "password modify",
                    &address.url(),
                    result.rc,
                    &result.text,
                );
                return Err(match classified {
                    err @ (LdapError::PasswordPolicy { .. } | LdapError::InvalidCredentials) => {
                        err
                    }
                    _ => LdapError::referral(
                        address.url(),
                        format!("result code {}: {}", result.rc, result.text),
                    ),
                });
            }
        }

        Ok(())
    }

    async fn startup_sequence(&self) -> LdapResult<()> {
        self.factory.initialize().await?;

        let mut client = self.factory.get_client(&DialOptions::new()).await?;
        let address = client.address().url();
        let outcome = client
            .ldap_mut()
            .with_timeout(self.config.operation_timeout)
            .search(
                &self.config.base_dn,
                Scope::Base,
                "(objectClass=*)",
                vec!["dn"],
            )
            .await
            .and_then(SearchResult::success)
            .map(|_| ())
            .map_err(|e| LdapError::Operation {
                operation: "connectivity probe",
                address,
                rc: 0,
                message: e.to_string(),
            });
        self.factory.release(client).await;

        outcome
    }
}

impl UserBackend for LdapUserBackend {
    fn backend_type(&self) -> &'static str {
        "ldap"
    }

    async fn check_password(
        &self,
        username: &str,
        password: &str,
    ) -> AuthenticationResult<bool> {
        self.check_password_sequence(username, password)
            .await
            .map_err(Into::into)
    }

    async fn get_details(&self, username: &str) -> AuthenticationResult<UserDetails> {
        self.details_sequence(username).await.map_err(Into::into)
    }

    async fn get_extended_details(
        &self,
        username: &str,
    ) -> AuthenticationResult<ExtendedUserDetails> {
        self.extended_details_sequence(username)
            .await
            .map_err(Into::into)
    }

    async fn update_password(
        &self,
        username: &str,
        new_password: &str,
    ) -> AuthenticationResult<()> {
        if new_password.is_empty() {
            return Err(AuthenticationError::password_weak(
                "the new password must not be empty",
            ));
        }

        let strategy =
            password::select_strategy(self.factory.features()?, self.config.implementation);

        self.mutate_password_sequence(username, None, new_password, strategy)
            .await
            .map_err(Into::into)
    }

    async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> AuthenticationResult<()> {
        if new_password.is_empty() {
            return Err(AuthenticationError::password_weak(
                "the new password must not be empty",
            ));
        }

        if old_password == new_password {
            return Err(AuthenticationError::password_weak(
                "the new password must differ from the old password",
            ));
        }

        let strategy =
            password::select_strategy(self.factory.features()?, self.config.implementation);

        if !self
            .check_password_sequence(username, old_password)
            .await?
        {
            return Err(AuthenticationError::IncorrectPassword);
        }

        self.mutate_password_sequence(username, Some(old_password), new_password, strategy)
            .await
            .map_err(Into::into)
    }

    async fn startup_check(&self) -> AuthenticationResult<()> {
        self.startup_sequence().await.map_err(Into::into)
    }

    async fn close(&self) -> AuthenticationResult<()> {
        self.factory.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GroupSearchMode, PoolingConfig};
    use std::time::Duration;

    fn backend() -> LdapUserBackend {
        let config = LdapConfig::builder()
            // Reserved port: nothing listens there, so network paths fail
            // fast in tests that reach them.
            .url("ldap://127.0.0.1:1")
            .bind("cn=admin,dc=example,dc=com", "password")
            .base_dn("dc=example,dc=com")
            .additional_users_dn("ou=users")
            .additional_groups_dn("ou=groups")
            .users_filter("(&(objectClass=person)({username_attribute}={input}))")
            .groups_filter("(&(objectClass=groupOfNames)(member={dn}))")
            .group_search_mode(GroupSearchMode::Filter)
            .pooling(PoolingConfig {
                enabled: true,
                max_size: 2,
                max_idle_time: Duration::from_secs(60),
            })
            .connect_timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        LdapUserBackend::new(config).unwrap()
    }

    #[test]
    fn construction_resolves_templates() {
        let backend = backend();

        assert_eq!(
            backend.users_filter().template(),
            "(&(objectClass=person)(uid={input}))"
        );
        assert!(backend.users_filter().placeholders().input);
        assert!(backend.groups_filter().placeholders().dn);
        assert_eq!(backend.users_base_dn, "ou=users,dc=example,dc=com");
        assert_eq!(backend.groups_base_dn, "ou=groups,dc=example,dc=com");
    }

    #[test]
    fn backend_type_is_ldap() {
        assert_eq!(backend().backend_type(), "ldap");
    }

    #[tokio::test]
    async fn empty_password_never_authenticates() {
        let backend = backend();
        let valid = backend.check_password("jdoe", "").await.unwrap();
        assert!(!valid);
    }

    #[tokio::test]
    async fn change_password_rejects_unchanged_password_before_any_network_io() {
        let backend = backend();
        let err = backend
            .change_password("jdoe", "same-password", "same-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::PasswordWeak(_)));
    }

    #[tokio::test]
    async fn change_password_rejects_empty_new_password() {
        let backend = backend();
        let err = backend.change_password("jdoe", "old", "").await.unwrap_err();
        assert!(matches!(err, AuthenticationError::PasswordWeak(_)));
    }

    #[tokio::test]
    async fn password_mutation_requires_initialization() {
        let backend = backend();
        let err = backend.update_password("jdoe", "NewPass1!").await.unwrap_err();
        assert!(matches!(err, AuthenticationError::OperationFailed(_)));
        assert!(err.to_string().contains("not initialized"));
    }

    #[tokio::test]
    async fn startup_check_fails_against_unreachable_directory() {
        let backend = backend();
        let err = backend.startup_check().await.unwrap_err();
        assert!(matches!(err, AuthenticationError::OperationFailed(_)));
    }
}
