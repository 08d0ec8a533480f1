//! Seller side of the step-locked exchange: verify the fiat credit,
//! co-sign and broadcast the release of our deposit, then sign the
//! buyer's collateral release for the same step.

use crate::exchange::{handshake::Setup, runner::Actor, Cause, Message};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const CREDIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub(super) async fn run(actor: &mut Actor, setup: &Setup) -> Result<(), Cause> {
    let step_count = actor.params.step_count;
    let fiat_steps = actor.params.fiat_amount.split(step_count);
    let mut last_confirmation: Option<Message> = None;

    for step in 1..=step_count {
        let deadline = Instant::now() + actor.timeouts.step;

        // The buyer opens the step. A duplicate release for an already
        // settled step means our confirmation was lost; answer it again.
        let (release, _buyer_signature) = loop {
            let message = actor
                .recv(
                    deadline,
                    last_confirmation.as_ref(),
                    Cause::StepTimeout { step },
                )
                .await?;
            match message {
                Message::StepRelease {
                    step: s,
                    tx,
                    signature,
                } if s == step => break (tx, signature),
                Message::StepRelease { step: s, .. } if s < step => {
                    if let Some(confirmation) = &last_confirmation {
                        actor.send(confirmation.clone()).await?;
                    }
                }
                Message::StepRelease { step: s, .. } => {
                    return Err(Cause::ProtocolViolation(format!(
                        "release for future step {} while at step {}",
                        s, step
                    )));
                }
                Message::Abort { reason } => {
                    return Err(Cause::CounterpartAbort { reason });
                }
                other => tracing::debug!(
                    "dropping {} while waiting for release of step {}",
                    other.kind(),
                    step
                ),
            }
        };

        // Only release bitcoin once the matching fiat credit shows up.
        let expected = fiat_steps[(step - 1) as usize];
        loop {
            if actor.payment.verify_credit(expected, setup.started_at).await? {
                break;
            }
            if Instant::now() + CREDIT_POLL_INTERVAL >= deadline {
                tracing::warn!(
                    exchange_id = %actor.params.exchange_id,
                    "fiat credit of {} for step {} never arrived",
                    expected,
                    step
                );
                return Err(Cause::StepTimeout { step });
            }
            sleep(CREDIT_POLL_INTERVAL).await;
        }

        let _own_signature = actor.wallet.sign_partial(&release, &setup.key).await?;
        actor.wallet.broadcast(release).await?;

        // Sign away `step / N` of the buyer's collateral in return.
        let collateral_release = actor
            .wallet
            .create_release(setup.deposits.buyer, step, step_count)
            .await?;
        let signature = actor
            .wallet
            .sign_partial(&collateral_release, &setup.key)
            .await?;
        let confirmation = Message::StepConfirmation {
            step,
            tx: collateral_release,
            signature,
        };
        actor.send(confirmation.clone()).await?;
        last_confirmation = Some(confirmation);

        actor.complete_step(step).await;
    }

    Ok(())
}
