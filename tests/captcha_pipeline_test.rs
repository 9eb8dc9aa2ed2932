mod common;

use dawn_farmer::clients::RewardsApiFactory;
use dawn_farmer::error::{ApiError, AppError, CaptchaError};
use dawn_farmer::models::{CaptchaChallenge, SolveOutcome};
use dawn_farmer::services::CaptchaPipeline;

use common::{test_config, FakeFactory, Harness};

fn pipeline(h: &Harness) -> CaptchaPipeline {
    CaptchaPipeline::new(h.solver.clone(), &h.config.captcha)
}

#[tokio::test(start_paused = true)]
async fn test_wrong_length_answer_is_reported_and_retried() {
    let h = Harness::new();
    h.solver.push_image(Ok(SolveOutcome::solved("ab12c", Some(7))));
    let api = FakeFactory { script: h.api.clone() }.create(None, None).unwrap();

    let challenge = pipeline(&h)
        .solve_image(api.as_ref(), "app-1", "a@hotmail.com")
        .await
        .unwrap();

    assert_eq!(challenge.answer(), "ab12cd");
    assert_eq!(challenge.puzzle_id(), Some("puzzle-1"));
    assert_eq!(h.solver.image_solves(), 2);
    assert_eq!(h.solver.reported(), vec![7]);
    assert_eq!(h.api.calls("get_puzzle"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_image_budget_exhausted() {
    let h = Harness::new();
    for _ in 0..3 {
        h.solver
            .push_image(Ok(SolveOutcome::unsolved("ERROR_CAPTCHA_UNSOLVABLE", None)));
    }
    let api = FakeFactory { script: h.api.clone() }.create(None, None).unwrap();

    let err = pipeline(&h)
        .solve_image(api.as_ref(), "app-1", "a@hotmail.com")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Captcha(CaptchaError::SolvingFailed { attempts: 3 })
    ));
    assert_eq!(h.solver.image_solves(), 3);
    assert!(h.solver.reported().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_proxy_forbidden_is_not_retried() {
    let h = Harness::new();
    h.api.push(
        "get_puzzle",
        Err(AppError::Api(ApiError::ProxyForbidden {
            endpoint: "/v1/puzzle/get-puzzle".to_string(),
            status: 403,
        })),
    );
    let api = FakeFactory { script: h.api.clone() }.create(None, None).unwrap();

    let err = pipeline(&h)
        .solve_image(api.as_ref(), "app-1", "a@hotmail.com")
        .await
        .unwrap_err();

    assert!(err.is_proxy_level());
    assert_eq!(h.api.calls("get_puzzle"), 1);
    assert_eq!(h.solver.image_solves(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_turnstile_retried_until_token() {
    let h = Harness::new();
    h.solver
        .push_turnstile(Ok(SolveOutcome::unsolved("ERROR_NO_SLOT_AVAILABLE", None)));
    h.solver.push_turnstile(Ok(SolveOutcome::solved("", None)));

    let challenge = pipeline(&h).solve_turnstile("a@hotmail.com").await.unwrap();

    assert_eq!(
        challenge,
        CaptchaChallenge::Turnstile {
            token: "turnstile-token".to_string()
        }
    );
    assert_eq!(h.solver.turnstile_solves(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_report_rejected_only_for_image_challenges() {
    let h = Harness::with_config(test_config());
    let pipeline = pipeline(&h);

    pipeline
        .report_rejected(&CaptchaChallenge::Turnstile {
            token: "t".to_string(),
        })
        .await;
    pipeline
        .report_rejected(&CaptchaChallenge::Image {
            puzzle_id: "p".to_string(),
            image_body: String::new(),
            answer: "ab12cd".to_string(),
            task_id: Some(42),
        })
        .await;

    assert_eq!(h.solver.reported(), vec![42]);
}
