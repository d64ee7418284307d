use crate::auth::{keys, AuthManager, TokenEncryption};
use crate::client::ClientConfig;
use crate::database::*;
use crate::models::*;
use crate::*;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;

    fn test_encryption() -> TokenEncryption {
        TokenEncryption::from_key(b"test-encryption-key-32-bytes!!!!").unwrap()
    }

    #[test]
    fn test_token_encryption_decryption() {
        let encryption = test_encryption();
        let original = "eyJhbGciOiJIUzI1NiJ9.access";

        let encrypted = encryption.encrypt(original).unwrap();
        assert_ne!(encrypted, original, "Encrypted token should differ from original");

        let decrypted = encryption.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, original);
    }

    #[test]
    fn test_token_encryption_uses_fresh_nonce() {
        let encryption = test_encryption();
        let first = encryption.encrypt("same_token").unwrap();
        let second = encryption.encrypt("same_token").unwrap();
        assert_ne!(first, second, "Each encryption should use its own nonce");
    }

    #[test]
    fn test_token_encryption_invalid_data() {
        let encryption = test_encryption();
        assert!(encryption.decrypt("not-base64!!!").is_err());
        // валидный base64, но короче nonce
        assert!(encryption.decrypt("AAAA").is_err());
    }

    #[test]
    fn test_token_encryption_wrong_key() {
        let encrypted = test_encryption().encrypt("secret").unwrap();
        let other = TokenEncryption::from_key(&[7u8; 32]).unwrap();
        assert!(other.decrypt(&encrypted).is_err());
    }

    #[test]
    fn test_token_encryption_rejects_short_key() {
        assert!(TokenEncryption::from_key(b"too-short").is_err());
    }

    mod database_tests {
        use super::*;
        use tempfile::TempDir;

        fn create_test_db() -> (Database, TempDir) {
            let temp_dir = TempDir::new().unwrap();
            let db_path = temp_dir.path().join("test.db");
            let db = Database::new(db_path.to_str().unwrap()).unwrap();
            (db, temp_dir)
        }

        #[test]
        fn test_database_new_sets_schema_version() {
            let (db, _temp_dir) = create_test_db();
            let conn = db.conn.lock().unwrap();
            let version: i32 = conn
                .query_row("PRAGMA user_version", [], |r| r.get(0))
                .unwrap();
            assert_eq!(version, 2);
        }

        #[test]
        fn test_database_wal_mode_enabled() {
            let (db, _temp_dir) = create_test_db();
            let conn = db.conn.lock().unwrap();
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |r| r.get(0))
                .unwrap();
            assert_eq!(mode.to_lowercase(), "wal");
        }

        #[test]
        fn test_app_meta_set_get_overwrite() {
            let (db, _temp_dir) = create_test_db();
            assert_eq!(db.get_app_meta("username").unwrap(), None);

            db.set_app_meta("username", "alice").unwrap();
            assert_eq!(db.get_app_meta("username").unwrap().as_deref(), Some("alice"));

            db.set_app_meta("username", "bob").unwrap();
            assert_eq!(db.get_app_meta("username").unwrap().as_deref(), Some("bob"));
        }

        #[test]
        fn test_app_meta_delete_many() {
            let (db, _temp_dir) = create_test_db();
            db.set_app_meta_many(&[("a", "1"), ("b", "2"), ("c", "3")])
                .unwrap();
            db.delete_app_meta(&["a", "b", "missing"]).unwrap();
            assert_eq!(db.get_app_meta("a").unwrap(), None);
            assert_eq!(db.get_app_meta("b").unwrap(), None);
            assert_eq!(db.get_app_meta("c").unwrap().as_deref(), Some("3"));
        }

        #[test]
        fn test_secret_is_encrypted_at_rest() {
            let (db, _temp_dir) = create_test_db();
            let sealed = db.seal("A1").unwrap();
            db.set_app_meta(keys::ACCESS_TOKEN, &sealed).unwrap();

            let raw = db.get_app_meta(keys::ACCESS_TOKEN).unwrap().unwrap();
            assert_ne!(raw, "A1");
            assert_eq!(db.get_secret(keys::ACCESS_TOKEN).unwrap().as_deref(), Some("A1"));
        }

        #[test]
        fn test_key_file_reused_on_reopen() {
            if std::env::var("AVIARY_ENCRYPTION_KEY").is_ok() {
                return;
            }
            let temp_dir = TempDir::new().unwrap();
            let db_path = temp_dir.path().join("test.db");
            {
                let db = Database::new(db_path.to_str().unwrap()).unwrap();
                let sealed = db.seal("R1").unwrap();
                db.set_app_meta(keys::REFRESH_TOKEN, &sealed).unwrap();
            }
            assert!(temp_dir.path().join("credential.key").exists());

            let reopened = Database::new(db_path.to_str().unwrap()).unwrap();
            assert_eq!(
                reopened.get_secret(keys::REFRESH_TOKEN).unwrap().as_deref(),
                Some("R1")
            );
        }

        #[cfg(unix)]
        #[test]
        fn test_key_file_readable_by_owner_only() {
            use std::os::unix::fs::PermissionsExt;
            if std::env::var("AVIARY_ENCRYPTION_KEY").is_ok() {
                return;
            }
            let (_db, temp_dir) = create_test_db();
            let metadata = std::fs::metadata(temp_dir.path().join("credential.key")).unwrap();
            assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        }
    }

    mod credential_store_tests {
        use super::*;
        use tempfile::TempDir;

        fn create_test_auth_manager() -> (AuthManager, TempDir) {
            let temp_dir = TempDir::new().unwrap();
            let db_path = temp_dir.path().join("test.db");
            let db = Arc::new(Database::new(db_path.to_str().unwrap()).unwrap());
            let auth_manager = AuthManager::new(
                "http://127.0.0.1:9/api".to_string(),
                "test".to_string(),
                Duration::from_millis(500),
                db,
            )
            .unwrap();
            (auth_manager, temp_dir)
        }

        fn pair(access: &str, refresh: &str) -> CredentialPair {
            CredentialPair {
                access_token: access.to_string(),
                refresh_token: refresh.to_string(),
                expires_in: 3600,
                username: "keeper".to_string(),
                nickname: "Keeper".to_string(),
            }
        }

        #[test]
        fn test_save_and_load_credentials() {
            let (auth_manager, _temp_dir) = create_test_auth_manager();
            assert_eq!(auth_manager.load_credentials().unwrap(), None);

            auth_manager.save_credentials(&pair("A1", "R1")).unwrap();
            assert_eq!(
                auth_manager.load_credentials().unwrap(),
                Some(pair("A1", "R1"))
            );
            assert_eq!(
                auth_manager.stored_access_token().unwrap().as_deref(),
                Some("A1")
            );
            assert_eq!(
                auth_manager.stored_refresh_token().unwrap().as_deref(),
                Some("R1")
            );
        }

        #[test]
        fn test_save_overwrites_previous_pair() {
            let (auth_manager, _temp_dir) = create_test_auth_manager();
            auth_manager.save_credentials(&pair("A1", "R1")).unwrap();
            auth_manager.save_credentials(&pair("A2", "R2")).unwrap();
            let loaded = auth_manager.load_credentials().unwrap().unwrap();
            assert_eq!(loaded.access_token, "A2");
            assert_eq!(loaded.refresh_token, "R2");
        }

        #[test]
        fn test_clear_removes_all_five_keys() {
            let (auth_manager, _temp_dir) = create_test_auth_manager();
            auth_manager.save_credentials(&pair("A1", "R1")).unwrap();
            auth_manager.clear_credentials().unwrap();

            assert_eq!(auth_manager.load_credentials().unwrap(), None);
            for key in keys::ALL {
                assert_eq!(
                    auth_manager.db.get_app_meta(key).unwrap(),
                    None,
                    "{} should be cleared",
                    key
                );
            }
        }

        #[tokio::test]
        async fn test_refresh_token_network_error() {
            // порт 9 (discard): соединение не устанавливается
            let (auth_manager, _temp_dir) = create_test_auth_manager();
            let result = auth_manager.refresh_token("R1").await;
            let err = result.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Transport, "Got: {}", err);
        }
    }

    mod client_state_tests {
        use super::*;
        use crate::client::state::{Admission, ClientState};
        use crate::client::RequestDescriptor;
        use reqwest::{Method, Url};

        fn request(path: &str) -> RequestDescriptor {
            RequestDescriptor::new(
                Method::GET,
                Url::parse(&format!("http://localhost/api{}", path)).unwrap(),
            )
        }

        #[test]
        fn test_first_401_leads_refresh_and_later_ones_queue() {
            let state = ClientState::new(Some("A1".to_string()));
            assert!(matches!(
                state.admit(Some("A1"), &request("/parrots")),
                Admission::Lead(0)
            ));
            assert!(state.is_refreshing());

            assert!(matches!(
                state.admit(Some("A1"), &request("/cages/all")),
                Admission::Queued(_)
            ));
            assert!(matches!(
                state.admit(Some("A1"), &request("/species")),
                Admission::Queued(_)
            ));
            assert_eq!(state.queue_len(), 2);
        }

        #[test]
        fn test_queue_drains_in_arrival_order() {
            let state = ClientState::new(Some("A1".to_string()));
            let _lead = state.admit(Some("A1"), &request("/parrots"));
            let _q1 = state.admit(Some("A1"), &request("/cages/all"));
            let _q2 = state.admit(Some("A1"), &request("/species"));

            let batch = state.take_queue_or_finish().unwrap();
            let paths: Vec<&str> = batch.iter().map(|p| p.request.url.path()).collect();
            assert_eq!(paths, vec!["/api/cages/all", "/api/species"]);
            assert!(state.is_refreshing(), "Still refreshing until queue observed empty");

            assert!(state.take_queue_or_finish().is_none());
            assert!(!state.is_refreshing());
        }

        #[tokio::test]
        async fn test_fail_all_delivers_error_to_every_waiter() {
            let state = ClientState::new(Some("A1".to_string()));
            let epoch = match state.admit(Some("A1"), &request("/parrots")) {
                Admission::Lead(epoch) => epoch,
                _ => panic!("expected lead"),
            };
            let receivers: Vec<_> = (0..3)
                .map(|_| match state.admit(Some("A1"), &request("/species")) {
                    Admission::Queued(rx) => rx,
                    _ => panic!("expected queued"),
                })
                .collect();

            let failed = state.fail_all_if(epoch, &ApiError::Auth("token refresh failed".into()));
            assert_eq!(failed, 3);
            assert!(!state.is_refreshing());
            assert_eq!(state.queue_len(), 0);
            for rx in receivers {
                let result = rx.await.unwrap();
                assert!(result.unwrap_err().is_auth());
            }
        }

        #[test]
        fn test_superseded_token_retries_without_refresh() {
            let state = ClientState::new(Some("A2".to_string()));
            match state.admit(Some("A1"), &request("/parrots")) {
                Admission::Retry(token) => assert_eq!(token, "A2"),
                _ => panic!("expected retry with current token"),
            }
            assert!(!state.is_refreshing());
        }

        #[test]
        fn test_purged_session_is_not_refreshed_again() {
            let state = ClientState::new(None);
            assert!(matches!(
                state.admit(Some("A1"), &request("/parrots")),
                Admission::SessionGone
            ));
            assert!(!state.is_refreshing());
        }

        #[test]
        fn test_no_credentials_at_all_leads() {
            let state = ClientState::new(None);
            assert!(matches!(
                state.admit(None, &request("/cages/all")),
                Admission::Lead(_)
            ));
        }

        #[test]
        fn test_logout_invalidates_inflight_refresh() {
            let state = ClientState::new(Some("A1".to_string()));
            let epoch = match state.admit(Some("A1"), &request("/parrots")) {
                Admission::Lead(epoch) => epoch,
                _ => panic!("expected lead"),
            };
            state.reset(&ApiError::Auth("logged out".into()));
            assert!(!state.is_refreshing());
            assert!(!state.install_bearer(epoch, "A2".to_string()));
            assert_eq!(state.bearer(), None);
        }

        #[tokio::test]
        async fn test_stale_refresh_failure_leaves_new_session_alone() {
            let state = ClientState::new(Some("A1".to_string()));
            let old_epoch = match state.admit(Some("A1"), &request("/parrots")) {
                Admission::Lead(epoch) => epoch,
                _ => panic!("expected lead"),
            };
            state.reset(&ApiError::Auth("logged out".into()));
            state.begin_session("L1".to_string(), &ApiError::Auth("replaced".into()));

            // Новая сессия уже начала свой refresh
            let new_epoch = match state.admit(Some("L1"), &request("/species")) {
                Admission::Lead(epoch) => epoch,
                _ => panic!("expected lead for the new session"),
            };
            assert_ne!(old_epoch, new_epoch);
            let waiter = match state.admit(Some("L1"), &request("/cages/all")) {
                Admission::Queued(rx) => rx,
                _ => panic!("expected queued"),
            };

            let err = ApiError::Auth("token refresh failed".into());
            assert!(!state.clear_bearer_if(old_epoch));
            assert_eq!(state.fail_all_if(old_epoch, &err), 0);
            assert_eq!(state.bearer().as_deref(), Some("L1"));
            assert!(state.is_refreshing());
            assert_eq!(state.queue_len(), 1);

            assert_eq!(state.fail_all_if(new_epoch, &err), 1);
            assert!(waiter.await.unwrap().unwrap_err().is_auth());
        }

        #[tokio::test]
        async fn test_login_fails_waiters_of_previous_session() {
            let state = ClientState::new(Some("A1".to_string()));
            let epoch = match state.admit(Some("A1"), &request("/parrots")) {
                Admission::Lead(epoch) => epoch,
                _ => panic!("expected lead"),
            };
            let waiter = match state.admit(Some("A1"), &request("/species")) {
                Admission::Queued(rx) => rx,
                _ => panic!("expected queued"),
            };

            state.begin_session("L1".to_string(), &ApiError::Auth("replaced".into()));
            assert!(!state.is_refreshing());
            assert!(waiter.await.unwrap().unwrap_err().is_auth());
            assert!(!state.install_bearer(epoch, "A2".to_string()));
            assert_eq!(state.bearer().as_deref(), Some("L1"));
        }
    }

    mod stats_tests {
        use super::*;
        use crate::stats::compute;

        fn parrot(species: i64, gender: Option<&str>) -> Parrot {
            Parrot {
                id: None,
                ring_number: "R".to_string(),
                species: Some(species),
                gender: gender.map(str::to_string),
                cage_id: None,
            }
        }

        fn cage(count: Option<u64>) -> Cage {
            Cage {
                id: None,
                cage_code: "C".to_string(),
                location: None,
                parrot_count: count,
            }
        }

        #[test]
        fn test_statistics_empty() {
            let stats = compute(&[], &[], &[]);
            assert_eq!(stats.cage_stats.total, 0);
            assert_eq!(stats.cage_stats.utilization_rate, 0.0);
            assert_eq!(stats.parrot_stats.total, 0);
            assert!(stats.species_stats.is_empty());
        }

        #[test]
        fn test_cage_utilization_rounded_to_one_decimal() {
            let cages = vec![cage(Some(2)), cage(Some(0)), cage(None)];
            let stats = compute(&cages, &[], &[]);
            assert_eq!(stats.cage_stats.used, 1);
            assert_eq!(stats.cage_stats.empty, 2);
            assert_eq!(stats.cage_stats.utilization_rate, 33.3);
        }

        #[test]
        fn test_gender_counts_accept_both_spellings() {
            let parrots = vec![
                parrot(1, Some("公")),
                parrot(1, Some("male")),
                parrot(2, Some("母")),
                parrot(2, Some("female")),
                parrot(2, Some("?")),
                parrot(2, None),
            ];
            let stats = compute(&[], &parrots, &[]);
            assert_eq!(stats.parrot_stats.male, 2);
            assert_eq!(stats.parrot_stats.female, 2);
            assert_eq!(stats.parrot_stats.unknown_gender, 2);
        }

        #[test]
        fn test_species_breakdown() {
            let species = vec![
                Species {
                    id: Some(1),
                    name: "虎皮".to_string(),
                },
                Species {
                    id: Some(2),
                    name: "玄凤".to_string(),
                },
                Species {
                    id: Some(3),
                    name: "牡丹".to_string(),
                },
            ];
            let parrots = vec![
                parrot(1, Some("公")),
                parrot(1, Some("母")),
                parrot(2, Some("female")),
            ];
            let stats = compute(&[], &parrots, &species);
            assert_eq!(stats.species_stats.len(), 3);
            assert_eq!(stats.species_stats[0].total, 2);
            assert_eq!(stats.species_stats[0].male, 1);
            assert_eq!(stats.species_stats[0].female, 1);
            assert_eq!(stats.species_stats[1].female, 1);
            assert_eq!(stats.species_stats[2].total, 0);
        }
    }

    mod model_tests {
        use super::*;

        #[test]
        fn test_credential_pair_wire_format() {
            let json = serde_json::json!({
                "accessToken": "A1",
                "refreshToken": "R1",
                "expiresIn": 7200,
                "username": "keeper",
                "nickname": "Keeper"
            });
            let pair: CredentialPair = serde_json::from_value(json).unwrap();
            assert_eq!(pair.access_token, "A1");
            assert_eq!(pair.expires_in, 7200);
        }

        #[test]
        fn test_page_has_more() {
            let page: Page<Parrot> = serde_json::from_value(serde_json::json!({
                "records": [{ "id": 1, "ringNumber": "CN-001", "species": 2, "gender": "公", "cageId": 5 }],
                "total": 3,
                "current": 1,
                "pages": 3
            }))
            .unwrap();
            assert_eq!(page.records[0].ring_number, "CN-001");
            assert_eq!(page.records[0].cage_id, Some(5));
            assert!(page.has_more());
        }

        #[test]
        fn test_cage_species_id_takes_leading_digits() {
            let cage = |location: Option<&str>| Cage {
                id: None,
                cage_code: "A1".to_string(),
                location: location.map(str::to_string),
                parrot_count: None,
            };
            assert_eq!(cage(Some("1")).species_id(), Some(1));
            assert_eq!(cage(Some("1 ")).species_id(), Some(1));
            assert_eq!(cage(Some(" 12abc")).species_id(), Some(12));
            assert_eq!(cage(Some("-3")).species_id(), Some(-3));
            assert_eq!(cage(Some("abc")).species_id(), None);
            assert_eq!(cage(Some("")).species_id(), None);
            assert_eq!(cage(None).species_id(), None);
        }

        #[test]
        fn test_refresh_request_is_camel_case() {
            let body = serde_json::to_value(RefreshRequest {
                refresh_token: "R1".to_string(),
            })
            .unwrap();
            assert_eq!(body, serde_json::json!({ "refreshToken": "R1" }));
        }

        #[test]
        fn test_client_config_defaults() {
            let config = ClientConfig::default();
            assert_eq!(config.timeout_ms, 5000);
            assert_eq!(config.api_base_url, "http://localhost:18976/api");
        }
    }
}
