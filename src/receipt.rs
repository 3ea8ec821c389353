use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Time};

const DATE_YMD: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const DATE_DMY: &[BorrowedFormatItem<'static>] =
    format_description!("[day padding:none].[month padding:none].[year]");
const TIME_HM: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");
const TIME_HMS: &[BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");

/// Shop-level fields of one receipt. Date and time are kept as the raw strings
/// read off the receipt; parsed values are derived lazily and may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub name: String,
    pub date_str: String,
    pub time_str: String,
    pub total: f64,
}

impl Shop {
    /// Accepts `2021-05-13` and `13.5.2021` style dates.
    pub fn date(&self) -> Option<Date> {
        Date::parse(&self.date_str, DATE_YMD)
            .or_else(|_| Date::parse(&self.date_str, DATE_DMY))
            .ok()
    }

    /// Accepts `16:46` and `16:46:47` style times.
    pub fn time(&self) -> Option<Time> {
        Time::parse(&self.time_str, TIME_HM)
            .or_else(|_| Time::parse(&self.time_str, TIME_HMS))
            .ok()
    }
}

/// Grocery categories, after instacart's grocery list categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Fruits")]
    Fruits,
    #[serde(rename = "Vegetables")]
    Vegetables,
    #[serde(rename = "Canned goods")]
    CannedGoods,
    #[serde(rename = "Dairy")]
    Dairy,
    #[serde(rename = "Meat")]
    Meat,
    #[serde(rename = "Fish and seafood")]
    Seafood,
    #[serde(rename = "Deli")]
    Deli,
    #[serde(rename = "Spices")]
    Spices,
    #[serde(rename = "Snacks")]
    Snacks,
    #[serde(rename = "Bread and baked goods")]
    BakedGoods,
    #[serde(rename = "Beverages")]
    Beverages,
    #[serde(rename = "Pasta, rice and cereal")]
    PastaRiceCereal,
    #[serde(rename = "Frozen food")]
    FrozenFood,
    #[serde(rename = "Personal care")]
    PersonalCare,
    #[serde(rename = "Health care")]
    HealthCare,
    #[serde(rename = "Household supplies")]
    Household,
    #[serde(rename = "Baby care items")]
    BabyCare,
    #[serde(rename = "Pet care items")]
    PetCare,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Fruits => "Fruits",
            Category::Vegetables => "Vegetables",
            Category::CannedGoods => "Canned goods",
            Category::Dairy => "Dairy",
            Category::Meat => "Meat",
            Category::Seafood => "Fish and seafood",
            Category::Deli => "Deli",
            Category::Spices => "Spices",
            Category::Snacks => "Snacks",
            Category::BakedGoods => "Bread and baked goods",
            Category::Beverages => "Beverages",
            Category::PastaRiceCereal => "Pasta, rice and cereal",
            Category::FrozenFood => "Frozen food",
            Category::PersonalCare => "Personal care",
            Category::HealthCare => "Health care",
            Category::Household => "Household supplies",
            Category::BabyCare => "Baby care items",
            Category::PetCare => "Pet care items",
        }
    }
}

fn default_count() -> Option<i64> {
    Some(1)
}

/// One purchased item. Count defaults to 1; mass, tax symbol and category are
/// only present when the receipt (or the extraction model) provides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub price: f64,
    #[serde(default = "default_count")]
    pub count: Option<i64>,
    #[serde(default)]
    pub mass: Option<f64>,
    #[serde(default)]
    pub tax: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub shop: Shop,
    pub items: Vec<Item>,
}
