//! 积分引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，
//! 存储值统一为 SCREAMING_SNAKE_CASE 字符串。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! display_as_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

/// 会员等级
///
/// 声明顺序即默认等级顺序；实际比较以启用的等级配置排序为准
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// 普通会员 - 保底等级，无条件满足
    #[default]
    Member,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "MEMBER",
            Self::Silver => "SILVER",
            Self::Gold => "GOLD",
            Self::Platinum => "PLATINUM",
            Self::Diamond => "DIAMOND",
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MEMBER" => Ok(Self::Member),
            "SILVER" => Ok(Self::Silver),
            "GOLD" => Ok(Self::Gold),
            "PLATINUM" => Ok(Self::Platinum),
            "DIAMOND" => Ok(Self::Diamond),
            other => Err(format!("未知等级: {}", other)),
        }
    }
}

/// 预订来源渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingSource {
    /// 官网直订
    Direct,
    Website,
    MobileApp,
    WalkIn,
    Phone,
    Whatsapp,
    Corporate,
    TravelAgent,
    OtaBookingCom,
    OtaMmt,
    OtaGoibibo,
    OtaYatra,
    OtaAgoda,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "DIRECT",
            Self::Website => "WEBSITE",
            Self::MobileApp => "MOBILE_APP",
            Self::WalkIn => "WALK_IN",
            Self::Phone => "PHONE",
            Self::Whatsapp => "WHATSAPP",
            Self::Corporate => "CORPORATE",
            Self::TravelAgent => "TRAVEL_AGENT",
            Self::OtaBookingCom => "OTA_BOOKING_COM",
            Self::OtaMmt => "OTA_MMT",
            Self::OtaGoibibo => "OTA_GOIBIBO",
            Self::OtaYatra => "OTA_YATRA",
            Self::OtaAgoda => "OTA_AGODA",
        }
    }
}

impl FromStr for BookingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DIRECT" => Ok(Self::Direct),
            "WEBSITE" => Ok(Self::Website),
            "MOBILE_APP" => Ok(Self::MobileApp),
            "WALK_IN" => Ok(Self::WalkIn),
            "PHONE" => Ok(Self::Phone),
            "WHATSAPP" => Ok(Self::Whatsapp),
            "CORPORATE" => Ok(Self::Corporate),
            "TRAVEL_AGENT" => Ok(Self::TravelAgent),
            "OTA_BOOKING_COM" => Ok(Self::OtaBookingCom),
            "OTA_MMT" => Ok(Self::OtaMmt),
            "OTA_GOIBIBO" => Ok(Self::OtaGoibibo),
            "OTA_YATRA" => Ok(Self::OtaYatra),
            "OTA_AGODA" => Ok(Self::OtaAgoda),
            other => Err(format!("未知预订渠道: {}", other)),
        }
    }
}

/// 预订状态（外部预订系统）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Completed,
    Cancelled,
    NoShow,
}

/// 积分流水原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerReason {
    /// 住宿完成入账（每笔预订至多一次）
    BookingStay,
    /// 活动奖励
    Bonus,
    /// 运营手动调整
    ManualAdjustment,
    /// 兑换商品扣减
    Redemption,
    /// 兑换取消退回
    RedemptionRefund,
    /// 积分过期
    Expiry,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingStay => "BOOKING_STAY",
            Self::Bonus => "BONUS",
            Self::ManualAdjustment => "MANUAL_ADJUSTMENT",
            Self::Redemption => "REDEMPTION",
            Self::RedemptionRefund => "REDEMPTION_REFUND",
            Self::Expiry => "EXPIRY",
        }
    }
}

/// 等级变更原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierChangeReason {
    /// 达标自动升级
    AutoUpgrade,
    /// 资格年度到期后重新定级（可降级）
    ReQualification,
}

impl TierChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoUpgrade => "AUTO_UPGRADE",
            Self::ReQualification => "RE_QUALIFICATION",
        }
    }
}

/// 权益核销记录状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerkRedemptionStatus {
    /// 已领取，待使用
    #[default]
    Active,
    /// 已使用
    Used,
    Cancelled,
    Expired,
}

impl PerkRedemptionStatus {
    /// 是否占用会员/单次入住的领取额度
    pub fn counts_toward_limits(&self) -> bool {
        matches!(self, Self::Active | Self::Used)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Used => "USED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

/// 兑换交易状态
///
/// 生命周期只能前进：PENDING -> CONFIRMED -> USED，
/// PENDING/CONFIRMED 可终止为 EXPIRED 或 CANCELLED
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionStatus {
    #[default]
    Pending,
    Confirmed,
    Used,
    Expired,
    Cancelled,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Used => "USED",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// 终态不再变更
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Used | Self::Expired | Self::Cancelled)
    }

    /// 是否允许从当前状态变更到 `next`
    ///
    /// 同状态重复提交视为幂等，允许通过
    pub fn can_transition_to(&self, next: RedemptionStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(
                next,
                Self::Confirmed | Self::Used | Self::Expired | Self::Cancelled
            ),
            Self::Confirmed => matches!(next, Self::Used | Self::Expired | Self::Cancelled),
            Self::Used | Self::Expired | Self::Cancelled => false,
        }
    }
}

/// 兑换商品奖励类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardKind {
    FreeNight,
    RoomUpgrade,
    Voucher,
    Amenity,
    Experience,
}

/// 风险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudSeverity {
    Low,
    Medium,
    High,
}

impl FraudSeverity {
    /// 风险分权重：HIGH=3，MEDIUM=2，其余=1
    pub fn weight(&self) -> u32 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// 风控处理建议（仅供参考，不自动拦截）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FraudRecommendation {
    Ok,
    Monitor,
    Review,
}

impl FraudRecommendation {
    /// 按风险分给出建议：>=5 人工复核，>=3 持续观察
    pub fn from_score(score: u32) -> Self {
        if score >= 5 {
            Self::Review
        } else if score >= 3 {
            Self::Monitor
        } else {
            Self::Ok
        }
    }
}

display_as_str!(
    Tier,
    BookingSource,
    LedgerReason,
    TierChangeReason,
    PerkRedemptionStatus,
    RedemptionStatus,
    FraudSeverity,
);
