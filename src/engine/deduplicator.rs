// ==========================================
// 农户批量入驻 - 去重器
// ==========================================
// 职责: 派发前按 external_id / (phone_number, org_id) 判重，
//       避免并发 Worker 重复创建同一身份
// 策略: skip → SKIPPED；update → 走更新路径；error → FAILED/DUPLICATE
// 说明: 同一次上传内的重复记录，skip/update 下 SKIPPED，error 下 FAILED/DUPLICATE
// ==========================================

use crate::domain::farmer::Farmer;
use crate::domain::operation::{ProcessingDetail, ProcessingOptions, WorkEntry};
use crate::domain::types::{DeduplicationMode, ErrorCode};
use crate::engine::processor::{RecordJob, RecordRoute};
use crate::repository::farmer_repo::FarmerRepository;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ==========================================
// ClaimSet - 本次操作已认领的身份
// ==========================================
#[derive(Debug, Default)]
pub struct ClaimSet {
    external_ids: HashSet<String>,
    phones: HashSet<String>,
}

impl ClaimSet {
    /// 认领身份；已被认领时返回 false
    fn claim(&mut self, external_id: Option<&str>, phone: &str) -> bool {
        let ext_taken = external_id.is_some_and(|e| self.external_ids.contains(e));
        let phone_taken = !phone.is_empty() && self.phones.contains(phone);
        if ext_taken || phone_taken {
            return false;
        }
        if let Some(e) = external_id {
            self.external_ids.insert(e.to_string());
        }
        if !phone.is_empty() {
            self.phones.insert(phone.to_string());
        }
        true
    }
}

/// 去重结果: 派发，或已直接定论
#[derive(Debug)]
pub enum DedupDecision {
    Dispatch(RecordJob),
    Settled(ProcessingDetail),
}

pub struct Deduplicator {
    farmers: Arc<dyn FarmerRepository>,
    call_timeout: Duration,
}

impl Deduplicator {
    pub fn new(farmers: Arc<dyn FarmerRepository>, call_timeout: Duration) -> Self {
        Self {
            farmers,
            call_timeout,
        }
    }

    /// 对一个分块内的有效记录做去重（批量查询一次）
    ///
    /// # 参数
    /// - org_id: 组织 ID
    /// - entries: 分块内校验通过的记录（文件顺序）
    /// - options: 操作选项
    /// - claims: 本次操作已认领的身份（跨分块累积）
    ///
    /// # 返回
    /// - 与 entries 一一对应的去重结果
    pub async fn resolve(
        &self,
        org_id: &str,
        entries: &[&WorkEntry],
        options: &Arc<ProcessingOptions>,
        claims: &mut ClaimSet,
    ) -> Vec<DedupDecision> {
        let mode = options.deduplication_mode;

        // 1. 上传内重复
        let mut fresh: Vec<&WorkEntry> = Vec::with_capacity(entries.len());
        let mut decisions: Vec<(usize, DedupDecision)> = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = &entry.record;
            if claims.claim(record.external_id.as_deref(), &record.phone_number) {
                fresh.push(entry);
            } else {
                debug!(record_index = record.record_index, "上传内重复记录");
                let reason = "duplicate of an earlier record in this upload";
                let detail = match mode {
                    DeduplicationMode::Error => ProcessingDetail::failed(
                        record.record_index,
                        record.external_id.clone(),
                        ErrorCode::Duplicate,
                        reason,
                        entry.retry_count,
                    ),
                    DeduplicationMode::Skip | DeduplicationMode::Update => {
                        ProcessingDetail::skipped(
                            record.record_index,
                            record.external_id.clone(),
                            None,
                            reason,
                            entry.retry_count,
                        )
                    }
                };
                decisions.push((record.record_index, DedupDecision::Settled(detail)));
            }
        }

        if fresh.is_empty() {
            return Self::in_input_order(entries, decisions);
        }

        // 2. 已存在身份（批量查询）
        let external_ids: Vec<String> = fresh
            .iter()
            .filter_map(|e| e.record.external_id.clone())
            .collect();
        let phones: Vec<String> = fresh.iter().map(|e| e.record.phone_number.clone()).collect();

        let lookup = tokio::time::timeout(
            self.call_timeout,
            self.farmers.find_existing(org_id, &external_ids, &phones),
        )
        .await;

        let existing: Vec<Farmer> = match lookup {
            Ok(Ok(existing)) => existing,
            Ok(Err(e)) => {
                warn!(org_id, error = %e, records = fresh.len(), "去重查询失败");
                let message = format!("duplicate lookup failed: {}", e);
                for entry in fresh {
                    decisions.push((
                        entry.record.record_index,
                        DedupDecision::Settled(ProcessingDetail::failed(
                            entry.record.record_index,
                            entry.record.external_id.clone(),
                            ErrorCode::LookupFailed,
                            message.clone(),
                            entry.retry_count,
                        )),
                    ));
                }
                return Self::in_input_order(entries, decisions);
            }
            Err(_) => {
                warn!(org_id, records = fresh.len(), "去重查询超时");
                let message = format!(
                    "duplicate lookup timed out after {} ms",
                    self.call_timeout.as_millis()
                );
                for entry in fresh {
                    decisions.push((
                        entry.record.record_index,
                        DedupDecision::Settled(ProcessingDetail::failed(
                            entry.record.record_index,
                            entry.record.external_id.clone(),
                            ErrorCode::Timeout,
                            message.clone(),
                            entry.retry_count,
                        )),
                    ));
                }
                return Self::in_input_order(entries, decisions);
            }
        };

        for entry in fresh {
            let record = &entry.record;
            let matched = Self::find_match(&existing, record.external_id.as_deref(), &record.phone_number);

            let decision = match (matched, mode) {
                (None, _) => DedupDecision::Dispatch(RecordJob {
                    org_id: org_id.to_string(),
                    entry: (*entry).clone(),
                    route: RecordRoute::Create,
                    options: Arc::clone(options),
                }),
                (Some(farmer), DeduplicationMode::Skip) => {
                    DedupDecision::Settled(ProcessingDetail::skipped(
                        record.record_index,
                        record.external_id.clone(),
                        Some(farmer.farmer_id.clone()),
                        "farmer already exists",
                        entry.retry_count,
                    ))
                }
                (Some(farmer), DeduplicationMode::Update) => DedupDecision::Dispatch(RecordJob {
                    org_id: org_id.to_string(),
                    entry: (*entry).clone(),
                    route: RecordRoute::Update {
                        farmer_id: farmer.farmer_id.clone(),
                    },
                    options: Arc::clone(options),
                }),
                (Some(farmer), DeduplicationMode::Error) => {
                    DedupDecision::Settled(ProcessingDetail::failed(
                        record.record_index,
                        record.external_id.clone(),
                        ErrorCode::Duplicate,
                        format!(
                            "farmer already exists (farmer_id {}, external_id {})",
                            farmer.farmer_id, farmer.profile.external_id
                        ),
                        entry.retry_count,
                    ))
                }
            };
            decisions.push((record.record_index, decision));
        }

        Self::in_input_order(entries, decisions)
    }

    /// external_id 命中优先，其次手机号
    fn find_match<'a>(
        existing: &'a [Farmer],
        external_id: Option<&str>,
        phone: &str,
    ) -> Option<&'a Farmer> {
        external_id
            .and_then(|ext| existing.iter().find(|f| f.profile.external_id == ext))
            .or_else(|| existing.iter().find(|f| f.profile.phone_number == phone))
    }

    fn in_input_order(
        entries: &[&WorkEntry],
        mut decisions: Vec<(usize, DedupDecision)>,
    ) -> Vec<DedupDecision> {
        let order: std::collections::HashMap<usize, usize> = entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.record.record_index, pos))
            .collect();
        decisions.sort_by_key(|(idx, _)| order.get(idx).copied().unwrap_or(usize::MAX));
        decisions.into_iter().map(|(_, d)| d).collect()
    }
}
