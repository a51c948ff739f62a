//! 对话角色：主助手与四个专项助手
//!
//! 每个 HandlerKind 声明自己的能力集（安全动作 / 敏感动作 / 可委派目标），
//! ActionCatalog 由这些声明汇总而成。控制动作（委派与回退）的参数结构也定义在此处，
//! 其 JSON Schema 由 schemars 生成后交给推理后端。

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dialog::catalog::ActionKind;
use crate::tools::{parameters_schema, ActionSpec};

/// 对话角色
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Primary,
    UpdateFlight,
    BookCarRental,
    BookHotel,
    BookExcursion,
}

/// 单个角色的能力集
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub safe: &'static [ActionKind],
    pub sensitive: &'static [ActionKind],
    /// 可调用的控制动作（委派 / 回退）
    pub control: &'static [ActionKind],
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 5] = [
        HandlerKind::Primary,
        HandlerKind::UpdateFlight,
        HandlerKind::BookCarRental,
        HandlerKind::BookHotel,
        HandlerKind::BookExcursion,
    ];

    pub fn capabilities(self) -> Capabilities {
        use ActionKind::*;
        match self {
            HandlerKind::Primary => Capabilities {
                safe: &[SearchAndContents, SearchFlights, LookupPolicy],
                sensitive: &[],
                control: &[
                    ToFlightBookingAssistant,
                    ToBookCarRental,
                    ToHotelBookingAssistant,
                    ToBookExcursion,
                ],
            },
            HandlerKind::UpdateFlight => Capabilities {
                safe: &[SearchFlights],
                sensitive: &[UpdateTicketToNewFlight, CancelTicket],
                control: &[CompleteOrEscalate],
            },
            HandlerKind::BookCarRental => Capabilities {
                safe: &[SearchCarRentals],
                sensitive: &[BookCarRental, UpdateCarRental, CancelCarRental],
                control: &[CompleteOrEscalate],
            },
            HandlerKind::BookHotel => Capabilities {
                safe: &[SearchHotels],
                sensitive: &[BookHotel, UpdateHotel, CancelHotel],
                control: &[CompleteOrEscalate],
            },
            HandlerKind::BookExcursion => Capabilities {
                safe: &[SearchTripRecommendations],
                sensitive: &[BookExcursion, UpdateExcursion, CancelExcursion],
                control: &[CompleteOrEscalate],
            },
        }
    }

    /// 交接提示中使用的助手名称
    pub fn display_name(self) -> &'static str {
        match self {
            HandlerKind::Primary => "primary assistant",
            HandlerKind::UpdateFlight => "Flight Updates & Booking Assistant",
            HandlerKind::BookCarRental => "Car Rental Assistant",
            HandlerKind::BookHotel => "Hotel Booking Assistant",
            HandlerKind::BookExcursion => "Trip Recommendation Assistant",
        }
    }

    /// 主助手委派到该角色所用的控制动作
    pub fn delegation_action(self) -> Option<ActionKind> {
        match self {
            HandlerKind::Primary => None,
            HandlerKind::UpdateFlight => Some(ActionKind::ToFlightBookingAssistant),
            HandlerKind::BookCarRental => Some(ActionKind::ToBookCarRental),
            HandlerKind::BookHotel => Some(ActionKind::ToHotelBookingAssistant),
            HandlerKind::BookExcursion => Some(ActionKind::ToBookExcursion),
        }
    }

    /// 本角色可见的全部动作（含控制动作），按声明顺序
    pub fn visible_actions(self) -> Vec<ActionKind> {
        let caps = self.capabilities();
        caps.safe
            .iter()
            .chain(caps.sensitive)
            .chain(caps.control)
            .copied()
            .collect()
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandlerKind::Primary => "primary",
            HandlerKind::UpdateFlight => "update_flight",
            HandlerKind::BookCarRental => "book_car_rental",
            HandlerKind::BookHotel => "book_hotel",
            HandlerKind::BookExcursion => "book_excursion",
        };
        f.write_str(s)
    }
}

/// 一次推理调用所需的角色上下文：系统提示 + 可用动作
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub kind: HandlerKind,
    pub system_prompt: String,
    pub actions: Vec<ActionSpec>,
}

/// A tool to mark the current task as completed and/or to escalate control of the dialog
/// to the main assistant, who can re-route the dialog based on the user's needs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompleteOrEscalate {
    #[serde(default = "default_cancel")]
    pub cancel: bool,
    pub reason: String,
}

fn default_cancel() -> bool {
    true
}

/// Transfers work to a specialized assistant to handle flight updates and cancellations.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToFlightBookingAssistant {
    /// Any necessary follow-up questions the update flight assistant should clarify before proceeding.
    pub request: String,
}

/// Transfers work to a specialized assistant to handle car rental bookings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToBookCarRental {
    /// The location where the user wants to rent a car.
    pub location: String,
    /// The start date of the car rental.
    pub start_date: String,
    /// The end date of the car rental.
    pub end_date: String,
    /// Any additional information or requests from the user regarding the car rental.
    pub request: String,
}

/// Transfer work to a specialized assistant to handle hotel bookings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToHotelBookingAssistant {
    /// The location where the user wants to book a hotel.
    pub location: String,
    /// The check-in date for the hotel.
    pub checkin_date: String,
    /// The check-out date for the hotel.
    pub checkout_date: String,
    /// Any additional information or requests from the user regarding the hotel booking.
    pub request: String,
}

/// Transfers work to a specialized assistant to handle trip recommendation and other excursion bookings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToBookExcursion {
    /// The location where the user wants to book a recommended trip.
    pub location: String,
    /// Any additional information or requests from the user regarding the trip recommendation.
    pub request: String,
}

/// 控制动作（委派 / 回退）的描述与参数 schema；非控制动作返回 None
pub fn control_spec(kind: ActionKind) -> Option<ActionSpec> {
    let (description, parameters) = match kind {
        ActionKind::CompleteOrEscalate => (
            "A tool to mark the current task as completed and/or to escalate control of the dialog \
             to the main assistant, who can re-route the dialog based on the user's needs.",
            parameters_schema::<CompleteOrEscalate>(),
        ),
        ActionKind::ToFlightBookingAssistant => (
            "Transfers work to a specialized assistant to handle flight updates and cancellations.",
            parameters_schema::<ToFlightBookingAssistant>(),
        ),
        ActionKind::ToBookCarRental => (
            "Transfers work to a specialized assistant to handle car rental bookings.",
            parameters_schema::<ToBookCarRental>(),
        ),
        ActionKind::ToHotelBookingAssistant => (
            "Transfer work to a specialized assistant to handle hotel bookings.",
            parameters_schema::<ToHotelBookingAssistant>(),
        ),
        ActionKind::ToBookExcursion => (
            "Transfers work to a specialized assistant to handle trip recommendation and other excursion bookings.",
            parameters_schema::<ToBookExcursion>(),
        ),
        _ => return None,
    };
    Some(ActionSpec {
        name: kind.name().to_string(),
        description: description.to_string(),
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_primary_delegates() {
        for kind in HandlerKind::ALL {
            let delegates = kind
                .capabilities()
                .control
                .iter()
                .any(|a| a.control().map(|c| c.is_delegation()).unwrap_or(false));
            assert_eq!(delegates, kind == HandlerKind::Primary, "{kind}");
        }
    }

    #[test]
    fn test_primary_has_no_sensitive_actions() {
        assert!(HandlerKind::Primary.capabilities().sensitive.is_empty());
    }

    #[test]
    fn test_delegation_action_maps_back() {
        for kind in HandlerKind::ALL.into_iter().skip(1) {
            let action = kind.delegation_action().unwrap();
            assert!(HandlerKind::Primary.capabilities().control.contains(&action));
        }
    }

    #[test]
    fn test_handler_kind_serde_snake_case() {
        let json = serde_json::to_string(&HandlerKind::BookCarRental).unwrap();
        assert_eq!(json, "\"book_car_rental\"");
    }

    #[test]
    fn test_control_spec_only_for_control_actions() {
        let spec = control_spec(ActionKind::ToHotelBookingAssistant).unwrap();
        assert_eq!(spec.name, "ToHotelBookingAssistant");
        assert!(spec.parameters["properties"]["checkin_date"].is_object());
        assert!(control_spec(ActionKind::BookHotel).is_none());
    }

    #[test]
    fn test_complete_or_escalate_defaults_cancel() {
        let args: CompleteOrEscalate =
            serde_json::from_value(serde_json::json!({"reason": "done"})).unwrap();
        assert!(args.cancel);
    }
}
