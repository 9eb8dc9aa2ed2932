mod common;

use dawn_farmer::infrastructure::AccountStore;
use dawn_farmer::models::{AccountLists, Operation};
use dawn_farmer::{App, Command};

use common::{account, Harness, CONFIRM_LINK};

#[tokio::test]
async fn test_clean_proxies_clears_every_record() {
    let h = Harness::new();
    h.seed_logged_in("a@hotmail.com").await;
    h.seed_logged_in("b@hotmail.com").await;

    let app = App::new(
        h.config.clone(),
        Command::CleanProxies,
        AccountLists::default(),
        h.runner(),
    );
    app.run().await.unwrap();

    for email in ["a@hotmail.com", "b@hotmail.com"] {
        let record = h.store.get(email).await.unwrap().unwrap();
        assert!(record.active_proxy.is_none());
        assert!(record.auth_token.is_some());
    }
    assert_eq!(h.api.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_login_runs_over_listed_accounts() {
    let mut config = common::test_config();
    config.max_concurrent_accounts = 2;
    let h = Harness::with_config(config);

    let accounts = AccountLists {
        login: vec![
            account("a@hotmail.com"),
            account("b@hotmail.com"),
            account("c@hotmail.com"),
        ],
        ..Default::default()
    };
    let app = App::new(
        h.config.clone(),
        Command::Run(Operation::Login),
        accounts,
        h.runner(),
    );
    app.run().await.unwrap();

    assert_eq!(h.api.calls("login"), 3);
    let results = h.exporter.results();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|(op, r)| *op == Operation::Login && r.status));
}

#[tokio::test(start_paused = true)]
async fn test_empty_list_does_nothing() {
    let h = Harness::new();
    h.mailbox.deliver_link(CONFIRM_LINK);

    let app = App::new(
        h.config.clone(),
        Command::Run(Operation::Registration),
        AccountLists::default(),
        h.runner(),
    );
    app.run().await.unwrap();

    assert_eq!(h.api.total_calls(), 0);
    assert!(h.exporter.results().is_empty());
}
