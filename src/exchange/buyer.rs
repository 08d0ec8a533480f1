//! Buyer side of the step-locked exchange: pay fiat, hand over the
//! signed release of the seller's deposit, collect the release of our
//! own collateral.

use crate::exchange::{handshake::Setup, runner::Actor, Cause, Message};
use tokio::time::Instant;

pub(super) async fn run(actor: &mut Actor, setup: &Setup) -> Result<(), Cause> {
    let step_count = actor.params.step_count;
    let fiat_steps = actor.params.fiat_amount.split(step_count);

    for step in 1..=step_count {
        let deadline = Instant::now() + actor.timeouts.step;
        let fiat = fiat_steps[(step - 1) as usize];

        let receipt = actor.payment.pay(step, fiat, &setup.remote.account).await?;
        tracing::debug!(
            exchange_id = %actor.params.exchange_id,
            "paid {} for step {} ({})",
            fiat,
            step,
            receipt.reference
        );

        let release = actor
            .wallet
            .create_release(setup.deposits.seller, step, step_count)
            .await?;
        let signature = actor.wallet.sign_partial(&release, &setup.key).await?;
        let request = Message::StepRelease {
            step,
            tx: release,
            signature,
        };
        actor.send(request.clone()).await?;

        // The seller answers with the signed release of our collateral
        // for this step; anything else is dropped, duplicates of older
        // steps are already settled.
        let collateral_release = loop {
            let message = actor
                .recv(deadline, Some(&request), Cause::StepTimeout { step })
                .await?;
            match message {
                Message::StepConfirmation { step: s, tx, .. } if s == step => break tx,
                Message::StepConfirmation { step: s, .. } if s < step => {
                    tracing::debug!("duplicate confirmation for settled step {}", s);
                }
                Message::StepConfirmation { step: s, .. } => {
                    return Err(Cause::ProtocolViolation(format!(
                        "confirmation for future step {} while at step {}",
                        s, step
                    )));
                }
                Message::Abort { reason } => {
                    return Err(Cause::CounterpartAbort { reason });
                }
                other => tracing::debug!(
                    "dropping {} while waiting for confirmation of step {}",
                    other.kind(),
                    step
                ),
            }
        };

        let _own_signature = actor
            .wallet
            .sign_partial(&collateral_release, &setup.key)
            .await?;
        actor.wallet.broadcast(collateral_release).await?;

        actor.complete_step(step).await;
    }

    Ok(())
}
