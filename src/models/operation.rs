use serde::{Deserialize, Serialize};

use crate::models::account::QuarantineReason;

/// 单个账号可执行的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Registration,
    Verification,
    Login,
    TaskCompletion,
    StatsExport,
    Farm,
}

impl Operation {
    /// 结果文件使用的模块名
    pub fn module_name(self) -> &'static str {
        match self {
            Operation::Registration => "registration",
            Operation::Verification => "verify",
            Operation::Login => "login",
            Operation::TaskCompletion => "tasks",
            Operation::StatsExport => "stats",
            Operation::Farm => "farm",
        }
    }

    /// 日志中使用的动作描述
    pub fn action(self) -> &'static str {
        match self {
            Operation::Registration => "注册",
            Operation::Verification => "验证邮箱",
            Operation::Login => "登录",
            Operation::TaskCompletion => "完成任务",
            Operation::StatsExport => "导出统计",
            Operation::Farm => "发送 keepalive",
        }
    }

    /// 从命令名解析操作
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "registration" | "register" => Some(Operation::Registration),
            "verify" | "verification" => Some(Operation::Verification),
            "login" => Some(Operation::Login),
            "complete_tasks" | "tasks" => Some(Operation::TaskCompletion),
            "export_stats" | "stats" => Some(Operation::StatsExport),
            "farm" => Some(Operation::Farm),
            _ => None,
        }
    }

    /// 需要已登录会话的操作
    pub fn requires_session(self) -> bool {
        matches!(
            self,
            Operation::TaskCompletion | Operation::StatsExport | Operation::Farm
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.module_name())
    }
}

/// 通过/失败类操作的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub identifier: String,
    pub data: String,
    pub status: bool,
}

impl OperationResult {
    pub fn success(email: &str, password: &str) -> Self {
        Self {
            identifier: email.to_string(),
            data: password.to_string(),
            status: true,
        }
    }

    pub fn failed(email: &str, password: &str) -> Self {
        Self {
            identifier: email.to_string(),
            data: password.to_string(),
            status: false,
        }
    }
}

/// 统计导出结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResult {
    pub success: bool,
    pub referral_point: Option<ReferralPoint>,
    pub reward_point: Option<RewardPoint>,
}

impl StatsResult {
    pub fn success(info: UserInfo) -> Self {
        Self {
            success: true,
            referral_point: Some(info.referral_point),
            reward_point: Some(info.reward_point),
        }
    }

    pub fn failed() -> Self {
        Self {
            success: false,
            referral_point: None,
            reward_point: None,
        }
    }
}

/// userInfo 接口返回的数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub referral_point: ReferralPoint,
    pub reward_point: RewardPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralPoint {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub referral_code: String,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub commission: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardPoint {
    #[serde(default, deserialize_with = "deserialize_number")]
    pub points: f64,
    #[serde(default)]
    pub registerpointsdate: Option<String>,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub twitter_x_id_points: f64,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub discordid_points: f64,
    #[serde(default, deserialize_with = "deserialize_number")]
    pub telegramid_points: f64,
}

/// 单个社交任务完成后获得的积分
pub const TASK_POINTS: f64 = 5000.0;

impl RewardPoint {
    /// twitter / discord / telegram 三个任务是否都已完成
    pub fn all_tasks_completed(&self) -> bool {
        self.twitter_x_id_points == TASK_POINTS
            && self.discordid_points == TASK_POINTS
            && self.telegramid_points == TASK_POINTS
    }
}

/// 一轮 farm 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarmReport {
    /// 仍在休眠期，没有发出任何请求
    Sleeping,
    /// keepalive 发送成功
    KeptAlive,
    /// keepalive 失败（已重新安排下一轮）
    Failed,
}

/// 一次操作的终态结果
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Finished(OperationResult),
    Stats(StatsResult),
    Farm(FarmReport),
}

impl OperationOutcome {
    /// 根据操作类型构造失败结果
    pub fn failure(operation: Operation, email: &str, password: &str) -> Self {
        match operation {
            Operation::StatsExport => OperationOutcome::Stats(StatsResult::failed()),
            Operation::Farm => OperationOutcome::Farm(FarmReport::Failed),
            _ => OperationOutcome::Finished(OperationResult::failed(email, password)),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            OperationOutcome::Finished(result) => result.status,
            OperationOutcome::Stats(stats) => stats.success,
            OperationOutcome::Farm(report) => *report != FarmReport::Failed,
        }
    }
}

/// OperationRunner 返回给编排层的报告
#[derive(Debug, Clone, PartialEq)]
pub struct OperationReport {
    pub email: String,
    pub outcome: OperationOutcome,
    /// 本次操作中账号被隔离的原因（编排层据此移出工作集）
    pub quarantined: Option<QuarantineReason>,
    /// 实际消耗的尝试次数
    pub attempts: usize,
}

// 接口中的数字字段有时以字符串形式返回
fn deserialize_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Visitor;
    use std::fmt;

    struct NumberVisitor;

    impl<'de> Visitor<'de> for NumberVisitor {
        type Value = f64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or a numeric string")
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as f64)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as f64)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value.trim().is_empty() {
                return Ok(0.0);
            }
            value.trim().parse().map_err(E::custom)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(0.0)
        }
    }

    deserializer.deserialize_any(NumberVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_info_accepts_string_numbers() {
        let json = serde_json::json!({
            "referralPoint": { "email": "a@hotmail.com", "referralCode": "abc", "commission": "12.5" },
            "rewardPoint": {
                "points": 100,
                "registerpointsdate": "2024-11-01",
                "twitter_x_id_points": 5000,
                "discordid_points": "5000",
                "telegramid_points": 5000.0
            }
        });
        let info: UserInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.referral_point.commission, 12.5);
        assert!(info.reward_point.all_tasks_completed());
    }

    #[test]
    fn test_partial_tasks_not_completed() {
        let json = serde_json::json!({ "points": 10, "twitter_x_id_points": 5000, "discordid_points": 0 });
        let reward: RewardPoint = serde_json::from_value(json).unwrap();
        assert!(!reward.all_tasks_completed());
    }

    #[test]
    fn test_failure_outcome_matches_operation() {
        assert_eq!(
            OperationOutcome::failure(Operation::StatsExport, "a", "b"),
            OperationOutcome::Stats(StatsResult::failed())
        );
        assert_eq!(
            OperationOutcome::failure(Operation::Farm, "a", "b"),
            OperationOutcome::Farm(FarmReport::Failed)
        );
        assert!(!OperationOutcome::failure(Operation::Login, "a", "b").is_success());
    }

    #[test]
    fn test_operation_names_round_trip() {
        for op in [
            Operation::Registration,
            Operation::Verification,
            Operation::Login,
            Operation::TaskCompletion,
            Operation::StatsExport,
            Operation::Farm,
        ] {
            assert_eq!(Operation::from_str(op.module_name()), Some(op));
        }
        assert_eq!(Operation::from_str("complete_tasks"), Some(Operation::TaskCompletion));
        assert_eq!(Operation::from_str("dance"), None);
    }
}
