//! 动作目录：动作名 → {副作用分类, 拥有该动作的角色}
//!
//! 启动时由全部 HandlerKind 的能力集汇总一次，之后只读共享（Arc<ActionCatalog>）。
//! 同一动作被一个角色声明为安全、被另一个声明为敏感时构建失败。

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::OrchestratorError;
use crate::dialog::HandlerKind;

/// 全部动作与控制动作
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionKind {
    SearchAndContents,
    SearchFlights,
    LookupPolicy,
    UpdateTicketToNewFlight,
    CancelTicket,
    SearchHotels,
    BookHotel,
    UpdateHotel,
    CancelHotel,
    SearchCarRentals,
    BookCarRental,
    UpdateCarRental,
    CancelCarRental,
    SearchTripRecommendations,
    BookExcursion,
    UpdateExcursion,
    CancelExcursion,
    CompleteOrEscalate,
    ToFlightBookingAssistant,
    ToBookCarRental,
    ToHotelBookingAssistant,
    ToBookExcursion,
}

/// 控制动作的语义
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Escalate,
    Delegate(HandlerKind),
}

impl Control {
    pub fn is_delegation(self) -> bool {
        matches!(self, Control::Delegate(_))
    }
}

impl ActionKind {
    pub const ALL: [ActionKind; 22] = [
        ActionKind::SearchAndContents,
        ActionKind::SearchFlights,
        ActionKind::LookupPolicy,
        ActionKind::UpdateTicketToNewFlight,
        ActionKind::CancelTicket,
        ActionKind::SearchHotels,
        ActionKind::BookHotel,
        ActionKind::UpdateHotel,
        ActionKind::CancelHotel,
        ActionKind::SearchCarRentals,
        ActionKind::BookCarRental,
        ActionKind::UpdateCarRental,
        ActionKind::CancelCarRental,
        ActionKind::SearchTripRecommendations,
        ActionKind::BookExcursion,
        ActionKind::UpdateExcursion,
        ActionKind::CancelExcursion,
        ActionKind::CompleteOrEscalate,
        ActionKind::ToFlightBookingAssistant,
        ActionKind::ToBookCarRental,
        ActionKind::ToHotelBookingAssistant,
        ActionKind::ToBookExcursion,
    ];

    /// 推理后端看到的动作名
    pub fn name(self) -> &'static str {
        match self {
            ActionKind::SearchAndContents => "search_and_contents",
            ActionKind::SearchFlights => "search_flights",
            ActionKind::LookupPolicy => "lookup_policy",
            ActionKind::UpdateTicketToNewFlight => "update_ticket_to_new_flight",
            ActionKind::CancelTicket => "cancel_ticket",
            ActionKind::SearchHotels => "search_hotels",
            ActionKind::BookHotel => "book_hotel",
            ActionKind::UpdateHotel => "update_hotel",
            ActionKind::CancelHotel => "cancel_hotel",
            ActionKind::SearchCarRentals => "search_car_rentals",
            ActionKind::BookCarRental => "book_car_rental",
            ActionKind::UpdateCarRental => "update_car_rental",
            ActionKind::CancelCarRental => "cancel_car_rental",
            ActionKind::SearchTripRecommendations => "search_trip_recommendations",
            ActionKind::BookExcursion => "book_excursion",
            ActionKind::UpdateExcursion => "update_excursion",
            ActionKind::CancelExcursion => "cancel_excursion",
            ActionKind::CompleteOrEscalate => "CompleteOrEscalate",
            ActionKind::ToFlightBookingAssistant => "ToFlightBookingAssistant",
            ActionKind::ToBookCarRental => "ToBookCarRental",
            ActionKind::ToHotelBookingAssistant => "ToHotelBookingAssistant",
            ActionKind::ToBookExcursion => "ToBookExcursion",
        }
    }

    pub fn from_name(name: &str) -> Option<ActionKind> {
        ActionKind::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn control(self) -> Option<Control> {
        match self {
            ActionKind::CompleteOrEscalate => Some(Control::Escalate),
            ActionKind::ToFlightBookingAssistant => Some(Control::Delegate(HandlerKind::UpdateFlight)),
            ActionKind::ToBookCarRental => Some(Control::Delegate(HandlerKind::BookCarRental)),
            ActionKind::ToHotelBookingAssistant => Some(Control::Delegate(HandlerKind::BookHotel)),
            ActionKind::ToBookExcursion => Some(Control::Delegate(HandlerKind::BookExcursion)),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 副作用分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// 只读，可直接执行
    Safe,
    /// 持久副作用，执行前需人工审批
    Sensitive,
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    side_effect: SideEffect,
    handlers: BTreeSet<HandlerKind>,
}

/// 只读动作目录
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    entries: HashMap<ActionKind, CatalogEntry>,
}

impl ActionCatalog {
    /// 汇总给定角色的能力集；控制动作按安全动作登记
    pub fn from_handlers(handlers: &[HandlerKind]) -> Result<Self, OrchestratorError> {
        let mut entries: HashMap<ActionKind, CatalogEntry> = HashMap::new();
        for &handler in handlers {
            let caps = handler.capabilities();
            let declared = caps
                .safe
                .iter()
                .chain(caps.control)
                .map(|a| (*a, SideEffect::Safe))
                .chain(caps.sensitive.iter().map(|a| (*a, SideEffect::Sensitive)));
            for (action, side_effect) in declared {
                let entry = entries.entry(action).or_insert_with(|| CatalogEntry {
                    side_effect,
                    handlers: BTreeSet::new(),
                });
                if entry.side_effect != side_effect {
                    return Err(OrchestratorError::InvalidRoute {
                        handler,
                        reason: format!("{action} declared both safe and sensitive"),
                    });
                }
                entry.handlers.insert(handler);
            }
        }
        tracing::debug!(actions = entries.len(), "action catalog built");
        Ok(Self { entries })
    }

    /// 全部角色的默认目录
    pub fn standard() -> Result<Self, OrchestratorError> {
        Self::from_handlers(&HandlerKind::ALL)
    }

    /// 按名解析已登记的动作
    pub fn resolve(&self, name: &str) -> Result<ActionKind, OrchestratorError> {
        ActionKind::from_name(name)
            .filter(|kind| self.entries.contains_key(kind))
            .ok_or_else(|| OrchestratorError::UnknownAction(name.to_string()))
    }

    pub fn classify(&self, name: &str) -> Result<SideEffect, OrchestratorError> {
        let kind = self.resolve(name)?;
        self.entries
            .get(&kind)
            .map(|e| e.side_effect)
            .ok_or_else(|| OrchestratorError::UnknownAction(name.to_string()))
    }

    /// None 表示动作已登记但不属于该角色
    pub fn classify_for(
        &self,
        handler: HandlerKind,
        name: &str,
    ) -> Result<Option<SideEffect>, OrchestratorError> {
        let kind = self.resolve(name)?;
        Ok(self
            .entries
            .get(&kind)
            .filter(|e| e.handlers.contains(&handler))
            .map(|e| e.side_effect))
    }

    pub fn handlers_of(&self, kind: ActionKind) -> impl Iterator<Item = HandlerKind> + '_ {
        self.entries
            .get(&kind)
            .into_iter()
            .flat_map(|e| e.handlers.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_action_has_unique_name() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_standard_catalog_covers_all_actions() {
        let catalog = ActionCatalog::standard().unwrap();
        assert_eq!(catalog.len(), ActionKind::ALL.len());
    }

    #[test]
    fn test_classify() {
        let catalog = ActionCatalog::standard().unwrap();
        assert_eq!(catalog.classify("search_flights").unwrap(), SideEffect::Safe);
        assert_eq!(catalog.classify("cancel_ticket").unwrap(), SideEffect::Sensitive);
        assert_eq!(catalog.classify("book_excursion").unwrap(), SideEffect::Sensitive);
        assert_eq!(
            catalog.classify_for(HandlerKind::Primary, "search_and_contents").unwrap(),
            Some(SideEffect::Safe)
        );
        assert_eq!(catalog.classify_for(HandlerKind::BookHotel, "search_and_contents").unwrap(), None);
    }

    #[test]
    fn test_classify_unknown() {
        let catalog = ActionCatalog::standard().unwrap();
        let err = catalog.classify("launch_rocket").unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAction(name) if name == "launch_rocket"));
    }

    #[test]
    fn test_classify_for_outside_capability_set() {
        let catalog = ActionCatalog::standard().unwrap();
        assert_eq!(
            catalog.classify_for(HandlerKind::BookHotel, "cancel_ticket").unwrap(),
            None
        );
        assert_eq!(
            catalog.classify_for(HandlerKind::UpdateFlight, "search_flights").unwrap(),
            Some(SideEffect::Safe)
        );
    }

    #[test]
    fn test_shared_safe_action_has_two_owners() {
        let catalog = ActionCatalog::standard().unwrap();
        let owners: Vec<_> = catalog.handlers_of(ActionKind::SearchFlights).collect();
        assert_eq!(owners, vec![HandlerKind::Primary, HandlerKind::UpdateFlight]);
    }

    #[test]
    fn test_partial_catalog_does_not_know_other_actions() {
        let catalog = ActionCatalog::from_handlers(&[HandlerKind::Primary]).unwrap();
        assert!(catalog.classify("book_hotel").is_err());
    }
}
