//! Transaction enrichment: resolve the outputs each input spends, then
//! derive input total, output total and fee.
//!
//! Previous transactions are fetched with batched verbose
//! `blockchain.transaction.get` calls, at most `max_batch_size` per batch,
//! with batches issued concurrently. Enriched inputs keep their original
//! order whatever order the batches complete in.

use std::collections::{HashMap, HashSet};

use bitcoin::{Amount, Txid};
use futures::future::try_join_all;
use tracing::debug;

use crate::error::ClientError;
use crate::rpc::ElectrumApi;
use crate::types::{BlockHeight, EnrichedTransaction, HistoryEntry, HistoryFilter, Transaction, TxIn};

// ==============================================================================
// Totals
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub input_total: Amount,
    pub output_total: Amount,
    pub fee: Amount,
}

/// Sum inputs and outputs and derive the fee.
///
/// Every input must already carry its resolved `prevout`. Amounts are exact
/// satoshis, so the fee needs no rounding.
pub fn compute_totals(tx: &Transaction) -> Result<Totals, ClientError> {
    let output_total = tx
        .vout
        .iter()
        .try_fold(Amount::ZERO, |acc, output| acc.checked_add(output.value))
        .ok_or_else(|| ClientError::Consistency(format!("output total of {} overflows", tx.txid)))?;

    let mut input_total = Amount::ZERO;
    for (index, input) in tx.vin.iter().enumerate() {
        let prevout = input.prevout.as_ref().ok_or_else(|| {
            ClientError::Consistency(format!("input {index} of {} has no resolved prevout", tx.txid))
        })?;
        input_total = input_total.checked_add(prevout.value).ok_or_else(|| {
            ClientError::Consistency(format!("input total of {} overflows", tx.txid))
        })?;
    }

    let fee = input_total.checked_sub(output_total).ok_or_else(|| {
        ClientError::Consistency(format!(
            "outputs of {} ({output_total}) exceed its inputs ({input_total})",
            tx.txid
        ))
    })?;

    Ok(Totals {
        input_total,
        output_total,
        fee,
    })
}

// ==============================================================================
// Enricher
// ==============================================================================

/// Drives enrichment against any [`ElectrumApi`].
pub struct Enricher<'a, A: ?Sized> {
    api: &'a A,
    max_batch_size: usize,
}

impl<'a, A> Enricher<'a, A>
where
    A: ElectrumApi + ?Sized,
{
    pub fn new(api: &'a A, max_batch_size: usize) -> Self {
        Self {
            api,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Return copies of `inputs` with `prevout` filled in, in the same order.
    /// Coinbase inputs reference nothing and are left out of the result.
    pub async fn resolve_inputs(&self, inputs: &[TxIn]) -> Result<Vec<TxIn>, ClientError> {
        let referenced: Vec<(usize, bitcoin::OutPoint)> = inputs
            .iter()
            .enumerate()
            .filter_map(|(index, input)| input.previous_output().map(|outpoint| (index, outpoint)))
            .collect();
        if referenced.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::with_capacity(referenced.len());
        let unique: Vec<Txid> = referenced
            .iter()
            .filter(|(_, outpoint)| seen.insert(outpoint.txid))
            .map(|(_, outpoint)| outpoint.txid)
            .collect();
        let prior = self.fetch_transactions(&unique).await?;

        referenced
            .into_iter()
            .map(|(index, outpoint)| {
                let funding = prior.get(&outpoint.txid).ok_or_else(|| {
                    ClientError::Consistency(format!("previous transaction {} was not returned", outpoint.txid))
                })?;
                let prevout = funding.vout.get(outpoint.vout as usize).cloned().ok_or_else(|| {
                    ClientError::Consistency(format!(
                        "{outpoint} references an output {} does not have",
                        outpoint.txid
                    ))
                })?;
                let mut input = inputs[index].clone();
                input.prevout = Some(prevout);
                Ok(input)
            })
            .collect()
    }

    /// Fetch `txids` in concurrent batches, keyed by txid.
    async fn fetch_transactions(&self, txids: &[Txid]) -> Result<HashMap<Txid, Transaction>, ClientError> {
        let batches = txids
            .chunks(self.max_batch_size)
            .map(|chunk| self.api.get_transactions_batch(chunk));
        let fetched = try_join_all(batches).await?;

        let mut by_txid = HashMap::with_capacity(txids.len());
        for (requested, tx) in txids.iter().zip(fetched.into_iter().flatten()) {
            if tx.txid != *requested {
                return Err(ClientError::Consistency(format!(
                    "asked for {requested}, server returned {}",
                    tx.txid
                )));
            }
            by_txid.insert(tx.txid, tx);
        }
        if by_txid.len() != txids.len() {
            return Err(ClientError::Consistency(format!(
                "fetched {} of {} previous transactions",
                by_txid.len(),
                txids.len()
            )));
        }
        Ok(by_txid)
    }

    /// Resolve every input of `tx` and compute its totals. A positive
    /// `height` also attaches the merkle proof for that block.
    ///
    /// Coinbase transactions have no resolvable inputs and fail the
    /// input-count check.
    pub async fn enrich_transaction(
        &self,
        mut tx: Transaction,
        height: i64,
    ) -> Result<EnrichedTransaction, ClientError> {
        let resolved = self.resolve_inputs(&tx.vin).await?;
        if resolved.len() != tx.vin.len() {
            return Err(ClientError::Consistency(format!(
                "resolved {} of {} inputs of {}",
                resolved.len(),
                tx.vin.len(),
                tx.txid
            )));
        }
        tx.vin = resolved;

        let totals = compute_totals(&tx)?;
        let merkle = match BlockHeight::from_electrum(height) {
            Some(block) => Some(self.api.get_merkle(&tx.txid, block).await?),
            None => None,
        };
        debug!(
            txid = %tx.txid,
            height,
            inputs = tx.vin.len(),
            fee_sat = totals.fee.to_sat(),
            "transaction enriched"
        );

        Ok(EnrichedTransaction {
            tx,
            height,
            merkle,
            input_total: totals.input_total,
            output_total: totals.output_total,
            fee: totals.fee,
            fee_in_satoshis: totals.fee.to_sat(),
        })
    }

    /// Fetch the history of `scripthash`, drop entries `filter` rejects, and
    /// enrich the rest. Results are concatenated in history order.
    pub async fn enrich_history(
        &self,
        scripthash: &str,
        filter: &HistoryFilter,
    ) -> Result<Vec<EnrichedTransaction>, ClientError> {
        filter.validate()?;

        let history = self.api.get_history(scripthash).await?;
        let total = history.len();
        let kept: Vec<HistoryEntry> = history
            .into_iter()
            .filter(|entry| filter.accepts(entry.height))
            .collect();
        debug!(scripthash, total, kept = kept.len(), "history filtered");

        let batches = kept
            .chunks(self.max_batch_size)
            .map(|chunk| self.enrich_entries(chunk));
        let enriched = try_join_all(batches).await?;
        Ok(enriched.into_iter().flatten().collect())
    }

    async fn enrich_entries(&self, entries: &[HistoryEntry]) -> Result<Vec<EnrichedTransaction>, ClientError> {
        let txids: Vec<Txid> = entries.iter().map(|entry| entry.tx_hash).collect();
        let txs = self.api.get_transactions_batch(&txids).await?;
        if txs.len() != entries.len() {
            return Err(ClientError::Consistency(format!(
                "fetched {} of {} history transactions",
                txs.len(),
                entries.len()
            )));
        }

        try_join_all(
            txs.into_iter()
                .zip(entries)
                .map(|(tx, entry)| self.enrich_transaction(tx, entry.height)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::MockElectrum;
    use crate::test_util::{coinbase_input, make_tx, output, spending_input, txid_from_byte};

    fn btc(value: f64) -> u64 {
        Amount::from_btc(value).expect("valid amount").to_sat()
    }

    #[tokio::test]
    async fn fee_is_input_total_minus_output_total() {
        let funding_a = make_tx(txid_from_byte(1), vec![coinbase_input()], vec![output(btc(0.6), 0)]);
        let funding_b = make_tx(
            txid_from_byte(2),
            vec![coinbase_input()],
            vec![output(btc(0.1), 0), output(btc(0.4), 1)],
        );
        let spend = make_tx(
            txid_from_byte(3),
            vec![spending_input(txid_from_byte(1), 0), spending_input(txid_from_byte(2), 1)],
            vec![output(btc(0.999), 0)],
        );
        let mock = MockElectrum::builder().with_tx(funding_a).with_tx(funding_b).build();

        let rich = Enricher::new(&mock, 80)
            .enrich_transaction(spend, 0)
            .await
            .expect("enrichment succeeds");
        assert_eq!(rich.input_total, Amount::from_btc(1.0).expect("valid"));
        assert_eq!(rich.output_total, Amount::from_btc(0.999).expect("valid"));
        assert_eq!(rich.fee, Amount::from_btc(0.001).expect("valid"));
        assert_eq!(rich.fee_in_satoshis, 100_000);
        assert!(rich.merkle.is_none());
        assert_eq!(mock.merkle_requests().len(), 0);
    }

    #[tokio::test]
    async fn inputs_keep_original_order_across_batches() {
        let mut builder = MockElectrum::builder();
        let mut inputs = Vec::new();
        for b in 1..=5u8 {
            builder = builder.with_tx(make_tx(
                txid_from_byte(b),
                vec![coinbase_input()],
                vec![output(u64::from(b) * 1_000, 0)],
            ));
            inputs.push(spending_input(txid_from_byte(b), 0));
        }
        inputs.reverse();
        let mock = builder.build();

        let resolved = Enricher::new(&mock, 2)
            .resolve_inputs(&inputs)
            .await
            .expect("inputs resolve");
        let values: Vec<u64> = resolved
            .iter()
            .map(|input| input.prevout.as_ref().expect("resolved").value.to_sat())
            .collect();
        assert_eq!(values, [5_000, 4_000, 3_000, 2_000, 1_000]);
        assert_eq!(mock.batch_sizes(), [2, 2, 1]);
    }

    #[tokio::test]
    async fn shared_previous_transaction_is_fetched_once() {
        let funding = make_tx(
            txid_from_byte(1),
            vec![coinbase_input()],
            vec![output(7_000, 0), output(3_000, 1)],
        );
        let spend = make_tx(
            txid_from_byte(2),
            vec![spending_input(txid_from_byte(1), 1), spending_input(txid_from_byte(1), 0)],
            vec![output(9_000, 0)],
        );
        let mock = MockElectrum::builder().with_tx(funding).build();

        let rich = Enricher::new(&mock, 80)
            .enrich_transaction(spend, 0)
            .await
            .expect("enrichment succeeds");
        assert_eq!(rich.fee_in_satoshis, 1_000);
        assert_eq!(mock.batch_sizes(), [1]);
        assert_eq!(
            rich.tx.vin[0].prevout.as_ref().expect("resolved").value,
            Amount::from_sat(3_000)
        );
    }

    #[tokio::test]
    async fn coinbase_transaction_fails_input_count_check() {
        let coinbase = make_tx(txid_from_byte(1), vec![coinbase_input()], vec![output(50, 0)]);
        let mock = MockElectrum::builder().build();

        let err = Enricher::new(&mock, 80)
            .enrich_transaction(coinbase, 1)
            .await
            .expect_err("coinbase has nothing to resolve");
        assert!(matches!(err, ClientError::Consistency(_)));
        assert!(mock.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn missing_output_index_is_a_consistency_error() {
        let funding = make_tx(txid_from_byte(1), vec![coinbase_input()], vec![output(1_000, 0)]);
        let spend = make_tx(
            txid_from_byte(2),
            vec![spending_input(txid_from_byte(1), 3)],
            vec![output(500, 0)],
        );
        let mock = MockElectrum::builder().with_tx(funding).build();

        let err = Enricher::new(&mock, 80)
            .enrich_transaction(spend, 0)
            .await
            .expect_err("vout 3 does not exist");
        assert!(matches!(err, ClientError::Consistency(_)));
    }

    #[tokio::test]
    async fn outputs_exceeding_inputs_is_a_consistency_error() {
        let funding = make_tx(txid_from_byte(1), vec![coinbase_input()], vec![output(1_000, 0)]);
        let spend = make_tx(
            txid_from_byte(2),
            vec![spending_input(txid_from_byte(1), 0)],
            vec![output(2_000, 0)],
        );
        let mock = MockElectrum::builder().with_tx(funding).build();

        let err = Enricher::new(&mock, 80)
            .enrich_transaction(spend, 0)
            .await
            .expect_err("negative fee");
        assert!(matches!(err, ClientError::Consistency(_)));
    }

    #[tokio::test]
    async fn missing_previous_transaction_propagates_server_error() {
        let spend = make_tx(
            txid_from_byte(2),
            vec![spending_input(txid_from_byte(1), 0)],
            vec![output(500, 0)],
        );
        let mock = MockElectrum::builder().build();

        let err = Enricher::new(&mock, 80)
            .enrich_transaction(spend, 0)
            .await
            .expect_err("funding tx unknown");
        assert!(matches!(err, ClientError::Rpc(_)));
    }

    #[tokio::test]
    async fn merkle_proof_attached_only_for_confirmed_heights() {
        let funding = make_tx(txid_from_byte(1), vec![coinbase_input()], vec![output(1_000, 0)]);
        let spend = make_tx(
            txid_from_byte(2),
            vec![spending_input(txid_from_byte(1), 0)],
            vec![output(900, 0)],
        );
        let mock = MockElectrum::builder().with_tx(funding).build();
        let enricher = Enricher::new(&mock, 80);

        let unconfirmed = enricher
            .enrich_transaction(spend.clone(), -1)
            .await
            .expect("mempool tx enriches");
        assert!(unconfirmed.merkle.is_none());

        let confirmed = enricher
            .enrich_transaction(spend, 640_000)
            .await
            .expect("confirmed tx enriches");
        assert_eq!(confirmed.merkle.expect("proof attached").block_height, 640_000);
        assert_eq!(
            mock.merkle_requests(),
            [(txid_from_byte(2), BlockHeight(640_000))]
        );
    }

    // ==========================================================================
    // History
    // ==========================================================================

    /// One funding tx plus one spend of it per height, listed in history.
    fn history_mock(heights: &[i64]) -> MockElectrum {
        let mut builder = MockElectrum::builder().with_tx(make_tx(
            txid_from_byte(200),
            vec![coinbase_input()],
            heights.iter().enumerate().map(|(i, _)| output(10_000, i as u32)).collect(),
        ));
        for (i, height) in heights.iter().enumerate() {
            let txid = txid_from_byte(i as u8 + 1);
            builder = builder
                .with_tx(make_tx(
                    txid,
                    vec![spending_input(txid_from_byte(200), i as u32)],
                    vec![output(9_000, 0)],
                ))
                .with_history_entry(HistoryEntry {
                    height: *height,
                    tx_hash: txid,
                    fee: None,
                });
        }
        builder.build()
    }

    fn heights(enriched: &[EnrichedTransaction]) -> Vec<i64> {
        enriched.iter().map(|tx| tx.height).collect()
    }

    #[tokio::test]
    async fn exclusive_bounds_drop_boundary_heights() {
        let mock = history_mock(&[100, 101, 150, 199, 200]);
        let filter = HistoryFilter {
            after_height: Some(100),
            before_height: Some(200),
            ..HistoryFilter::default()
        };

        let enriched = Enricher::new(&mock, 80)
            .enrich_history("sh", &filter)
            .await
            .expect("history enriches");
        assert_eq!(heights(&enriched), [101, 150, 199]);
    }

    #[tokio::test]
    async fn inclusive_bounds_keep_boundary_heights() {
        let mock = history_mock(&[99, 100, 150, 200, 201]);
        let filter = HistoryFilter {
            after_height: Some(100),
            before_height: Some(200),
            inclusive: true,
            ..HistoryFilter::default()
        };

        let enriched = Enricher::new(&mock, 80)
            .enrich_history("sh", &filter)
            .await
            .expect("history enriches");
        assert_eq!(heights(&enriched), [100, 150, 200]);
    }

    #[tokio::test]
    async fn inverted_bounds_fail_before_any_network_call() {
        let mock = history_mock(&[150]);
        let filter = HistoryFilter {
            after_height: Some(200),
            before_height: Some(100),
            ..HistoryFilter::default()
        };

        let err = Enricher::new(&mock, 80)
            .enrich_history("sh", &filter)
            .await
            .expect_err("inverted bounds");
        assert!(matches!(err, ClientError::Consistency(_)));
        assert_eq!(mock.history_requests(), 0);
        assert!(mock.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn mempool_entries_pass_bounds_unless_only_confirmed() {
        let mock = history_mock(&[0, 150, -1]);
        let bounded = HistoryFilter {
            after_height: Some(100),
            before_height: Some(200),
            ..HistoryFilter::default()
        };
        let enriched = Enricher::new(&mock, 80)
            .enrich_history("sh", &bounded)
            .await
            .expect("history enriches");
        assert_eq!(heights(&enriched), [0, 150, -1]);

        let confirmed_only = HistoryFilter {
            only_confirmed: true,
            ..bounded
        };
        let enriched = Enricher::new(&mock, 80)
            .enrich_history("sh", &confirmed_only)
            .await
            .expect("history enriches");
        assert_eq!(heights(&enriched), [150]);
    }

    #[tokio::test]
    async fn history_batches_concatenate_in_order_with_own_heights() {
        let mock = history_mock(&[10, 20, 30, 40, 50]);

        let enriched = Enricher::new(&mock, 2)
            .enrich_history("sh", &HistoryFilter::default())
            .await
            .expect("history enriches");
        assert_eq!(heights(&enriched), [10, 20, 30, 40, 50]);
        let proof_heights: Vec<u32> = enriched
            .iter()
            .map(|tx| tx.merkle.as_ref().expect("confirmed").block_height)
            .collect();
        assert_eq!(proof_heights, [10, 20, 30, 40, 50]);
        assert_eq!(mock.history_requests(), 1);
    }

    #[test]
    fn compute_totals_requires_resolved_inputs() {
        let tx = make_tx(
            txid_from_byte(1),
            vec![spending_input(txid_from_byte(2), 0)],
            vec![output(1, 0)],
        );
        assert!(matches!(compute_totals(&tx), Err(ClientError::Consistency(_))));
    }
}
