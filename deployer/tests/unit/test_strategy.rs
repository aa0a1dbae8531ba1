//! Policy tables as seen from outside the controller

use hotdeploy::deploy::lifecycle::ControllerState;
use hotdeploy::deploy::mode::DeployMode;
use hotdeploy::deploy::strategy::{Action, Op, Strategy};
use tokio_test::{assert_err, assert_ok};

const OPS: [Op; 6] = [Op::StartOnInit, Op::Start, Op::Stop, Op::Update, Op::Request, Op::Alarm];

fn valid_policies() -> Vec<Strategy> {
    let modes = [DeployMode::Default, DeployMode::Automatic, DeployMode::Lazy, DeployMode::Manual];
    let mut policies = Vec::new();
    for startup in modes {
        for redeploy in modes {
            if let Ok(strategy) = Strategy::select(startup, redeploy) {
                policies.push(strategy);
            }
        }
    }
    policies
}

#[test]
fn test_transient_states_never_act() {
    let policies = valid_policies();
    assert!(!policies.is_empty());

    for strategy in policies {
        for op in OPS {
            for state in [ControllerState::Starting, ControllerState::Destroying, ControllerState::Destroyed] {
                assert_eq!(strategy.decide(op, state), Action::Nothing, "{:?} {:?} {:?}", strategy, op, state);
            }
        }
    }
}

#[test]
fn test_stop_and_start_rows_are_shared() {
    for strategy in valid_policies() {
        assert_eq!(strategy.decide(Op::Stop, ControllerState::Active), Action::Stop);
        assert_eq!(strategy.decide(Op::Stop, ControllerState::Stopped), Action::Nothing);
        assert_eq!(strategy.decide(Op::Start, ControllerState::Stopped), Action::Start);
        // only restart or update leave an error behind
        assert_eq!(strategy.decide(Op::Start, ControllerState::Error), Action::Nothing);
        assert_eq!(strategy.decide(Op::Update, ControllerState::Error), Action::Restart);
    }
}

#[test]
fn test_rejected_policies() {
    let err = assert_err!(Strategy::select(DeployMode::Manual, DeployMode::Automatic));
    assert!(err.is_config());
    assert_err!(Strategy::select(DeployMode::Automatic, DeployMode::Lazy));
    let manual = assert_ok!(Strategy::select(DeployMode::Manual, DeployMode::Manual));
    assert_eq!(manual.startup_mode(), DeployMode::Manual);
}
