// ==========================================
// 农户批量入驻 - 农户 Repository Trait
// ==========================================
// 职责: 定义农户数据访问接口（不包含业务逻辑）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::farmer::{Farmer, FarmerProfile, NewFarmer};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

// ==========================================
// FarmerRepository Trait
// ==========================================
// 用途: 去重查询 + 创建 / 更新农户
// 实现者: FarmerRepositoryImpl（使用 rusqlite）
#[async_trait]
pub trait FarmerRepository: Send + Sync {
    // ===== 单条查询 =====

    /// 按 external_id 查询
    ///
    /// # 返回
    /// - Ok(Some(Farmer)): 已存在
    /// - Ok(None): 不存在
    async fn get_by_external_id(
        &self,
        org_id: &str,
        external_id: &str,
    ) -> RepositoryResult<Option<Farmer>>;

    /// 按 (phone_number, org_id) 查询
    async fn get_by_phone(&self, org_id: &str, phone_number: &str)
        -> RepositoryResult<Option<Farmer>>;

    // ===== 批量查询（去重，按分块调用）=====

    /// 批量查询已存在的农户（external_id 或手机号任一命中）
    ///
    /// # 参数
    /// - org_id: 组织 ID
    /// - external_ids: 待查 external_id 列表
    /// - phone_numbers: 待查手机号列表
    async fn find_existing(
        &self,
        org_id: &str,
        external_ids: &[String],
        phone_numbers: &[String],
    ) -> RepositoryResult<Vec<Farmer>>;

    // ===== 写入 =====

    /// 创建农户
    ///
    /// # 返回
    /// - Ok(Farmer): 新建的农户（含 farmer_id）
    /// - Err: 唯一约束冲突 / 数据库错误
    async fn create(&self, farmer: NewFarmer) -> RepositoryResult<Farmer>;

    /// 更新农户可写字段
    ///
    /// # 返回
    /// - Ok(Farmer): 更新后的农户
    /// - Err(NotFound): farmer_id 不存在
    async fn update(&self, farmer_id: &str, profile: FarmerProfile) -> RepositoryResult<Farmer>;

    /// 统计组织下农户数量
    async fn count_by_org(&self, org_id: &str) -> RepositoryResult<usize>;
}
