//! Seams to the collaborators the executor suspends on. Implementations live
//! outside the core: the daemon wires in real wallet, node and chain clients,
//! tests wire in doubles.

use crate::bitcoin::{Address, Amount, FeeRate, Transaction, Txid, Utxo};
use crate::lightning::PaymentParams;
use crate::swap::Asset;
use anyhow::Result;
use async_trait::async_trait;
use bitcoin::util::psbt::PartiallySignedTransaction;
use std::sync::Arc;

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast_tx(&self, tx: &Transaction, asset: Asset) -> Result<Txid>;
}

#[async_trait]
pub trait FeeEstimator: Send + Sync {
    /// Fee rate expected to confirm within `conf_target` blocks.
    async fn estimate_fee_rate(&self, conf_target: u32, asset: Asset) -> Result<FeeRate>;
}

#[async_trait]
pub trait UtxoProvider: Send + Sync {
    /// Select and lock coins worth at least `amount` plus fees.
    async fn select_utxos(&self, amount: Amount, asset: Asset) -> Result<Vec<Utxo>>;

    /// Sign our inputs of the swap PSBT and finalize it into a transaction.
    async fn sign_swap_psbt(&self, psbt: PartiallySignedTransaction) -> Result<Transaction>;

    /// Release coins locked by [`select_utxos`](UtxoProvider::select_utxos)
    /// when the swap tx will not be broadcast.
    async fn release(&self, utxos: &[Utxo]) -> Result<()>;
}

#[async_trait]
pub trait WalletClient: Send + Sync {
    async fn change_address(&self, asset: Asset) -> Result<Address>;

    async fn refund_address(&self, asset: Asset) -> Result<Address>;
}

#[async_trait]
pub trait LightningClient: Send + Sync {
    /// Dispatch an off-chain payment. Returns once the payment is underway;
    /// settlement is observed elsewhere.
    async fn pay_invoice(&self, invoice: &str, params: PaymentParams) -> Result<()>;
}

/// The collaborator bundle handed to the executor.
#[derive(Clone)]
pub struct Deps {
    pub broadcaster: Arc<dyn Broadcaster>,
    pub fee_estimator: Arc<dyn FeeEstimator>,
    pub utxo_provider: Arc<dyn UtxoProvider>,
    pub wallet: Arc<dyn WalletClient>,
    pub lightning: Arc<dyn LightningClient>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::bitcoin::{Network, OutPoint, Script, TxOut};
    use bitcoin::Address;
    use std::str::FromStr;
    use std::sync::Mutex;

    pub(crate) struct RecordingBroadcaster {
        pub broadcasts: Mutex<Vec<(Transaction, Asset)>>,
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn broadcast_tx(&self, tx: &Transaction, asset: Asset) -> Result<Txid> {
            self.broadcasts
                .lock()
                .expect("broadcast mutex poisoned")
                .push((tx.clone(), asset));
            Ok(tx.txid())
        }
    }

    pub(crate) struct StaticFeeEstimator {
        pub rate: Mutex<FeeRate>,
    }

    impl StaticFeeEstimator {
        pub(crate) fn set_rate(&self, rate: FeeRate) {
            *self.rate.lock().expect("fee mutex poisoned") = rate;
        }
    }

    #[async_trait]
    impl FeeEstimator for StaticFeeEstimator {
        async fn estimate_fee_rate(&self, _conf_target: u32, _asset: Asset) -> Result<FeeRate> {
            Ok(*self.rate.lock().expect("fee mutex poisoned"))
        }
    }

    pub(crate) struct MockUtxoProvider {
        pub utxos: Vec<Utxo>,
        pub released: Mutex<Vec<Utxo>>,
    }

    #[async_trait]
    impl UtxoProvider for MockUtxoProvider {
        async fn select_utxos(&self, amount: Amount, _asset: Asset) -> Result<Vec<Utxo>> {
            let total: u64 = self.utxos.iter().map(Utxo::value).sum();
            anyhow::ensure!(
                total >= amount.as_sat(),
                "wallet holds {total} sat, {amount} required"
            );
            Ok(self.utxos.clone())
        }

        async fn sign_swap_psbt(
            &self,
            psbt: bitcoin::util::psbt::PartiallySignedTransaction,
        ) -> Result<Transaction> {
            let mut tx = psbt.extract_tx();
            for input in &mut tx.input {
                input.witness = vec![vec![0u8; 72], vec![0u8; 33]];
            }
            Ok(tx)
        }

        async fn release(&self, utxos: &[Utxo]) -> Result<()> {
            self.released
                .lock()
                .expect("release mutex poisoned")
                .extend_from_slice(utxos);
            Ok(())
        }
    }

    pub(crate) struct StaticWallet {
        pub address: Address,
    }

    #[async_trait]
    impl WalletClient for StaticWallet {
        async fn change_address(&self, _asset: Asset) -> Result<Address> {
            Ok(self.address.clone())
        }

        async fn refund_address(&self, _asset: Asset) -> Result<Address> {
            Ok(self.address.clone())
        }
    }

    pub(crate) struct RecordingLightning {
        pub payments: Mutex<Vec<(String, PaymentParams)>>,
    }

    #[async_trait]
    impl LightningClient for RecordingLightning {
        async fn pay_invoice(&self, invoice: &str, params: PaymentParams) -> Result<()> {
            self.payments
                .lock()
                .expect("payments mutex poisoned")
                .push((invoice.to_string(), params));
            Ok(())
        }
    }

    /// Concrete mock collaborators, with handles kept so tests can inspect
    /// what the executor did.
    pub(crate) struct MockCollaborators {
        pub broadcaster: Arc<RecordingBroadcaster>,
        pub fee_estimator: Arc<StaticFeeEstimator>,
        pub utxo_provider: Arc<MockUtxoProvider>,
        pub wallet: Arc<StaticWallet>,
        pub lightning: Arc<RecordingLightning>,
    }

    impl MockCollaborators {
        pub(crate) fn deps(&self) -> Deps {
            Deps {
                broadcaster: self.broadcaster.clone(),
                fee_estimator: self.fee_estimator.clone(),
                utxo_provider: self.utxo_provider.clone(),
                wallet: self.wallet.clone(),
                lightning: self.lightning.clone(),
            }
        }
    }

    pub(crate) fn mock_deps() -> MockCollaborators {
        let funding_txid =
            Txid::from_str("00000000000000000000000000000000000000000000000000000000000000f0")
                .expect("static txid");
        let wallet_address = Address::p2wsh(&Script::new(), Network::Regtest);

        let utxos = (0..2)
            .map(|vout| Utxo {
                outpoint: OutPoint::new(funding_txid, vout),
                txout: TxOut {
                    value: 1_000_000,
                    script_pubkey: wallet_address.script_pubkey(),
                },
            })
            .collect();

        MockCollaborators {
            broadcaster: Arc::new(RecordingBroadcaster {
                broadcasts: Mutex::new(vec![]),
            }),
            fee_estimator: Arc::new(StaticFeeEstimator {
                rate: Mutex::new(FeeRate::from_sat_per_vb(2)),
            }),
            utxo_provider: Arc::new(MockUtxoProvider {
                utxos,
                released: Mutex::new(vec![]),
            }),
            wallet: Arc::new(StaticWallet {
                address: wallet_address,
            }),
            lightning: Arc::new(RecordingLightning {
                payments: Mutex::new(vec![]),
            }),
        }
    }
}
