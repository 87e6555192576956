//! Static store policy texts served by `lookup_store_policy`.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTopic {
    Shipping,
    Returns,
    Payment,
    Warranty,
    Order,
    Wholesale,
    Custom,
}

impl PolicyTopic {
    pub const ALL: [PolicyTopic; 7] = [
        Self::Shipping,
        Self::Returns,
        Self::Payment,
        Self::Warranty,
        Self::Order,
        Self::Wholesale,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shipping => "shipping",
            Self::Returns => "returns",
            Self::Payment => "payment",
            Self::Warranty => "warranty",
            Self::Order => "order",
            Self::Wholesale => "wholesale",
            Self::Custom => "custom",
        }
    }

    /// Accepts the canonical keys plus the aliases the reasoner tends to use.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "shipping" | "delivery" => Some(Self::Shipping),
            "returns" | "return" | "refund" => Some(Self::Returns),
            "payment" | "payments" => Some(Self::Payment),
            "warranty" => Some(Self::Warranty),
            "order" | "order_process" | "ordering" => Some(Self::Order),
            "wholesale" | "bulk_sales" | "bulk" => Some(Self::Wholesale),
            "custom" | "custom_services" | "custom_order" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            Self::Shipping => SHIPPING,
            Self::Returns => RETURNS,
            Self::Payment => PAYMENT,
            Self::Warranty => WARRANTY,
            Self::Order => ORDER,
            Self::Wholesale => WHOLESALE,
            Self::Custom => CUSTOM,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAnswer {
    pub topic: Option<PolicyTopic>,
    pub text: String,
}

/// Resolves a policy query. Unknown topics get a text listing what is available.
pub fn lookup(query: &str) -> PolicyAnswer {
    match PolicyTopic::parse(query) {
        Some(topic) => PolicyAnswer { topic: Some(topic), text: topic.text().to_string() },
        None => {
            let available =
                PolicyTopic::ALL.iter().map(PolicyTopic::as_str).collect::<Vec<_>>().join(", ");
            PolicyAnswer {
                topic: None,
                text: format!(
                    "Xin lỗi, tôi không chắc bạn đang hỏi về chính sách nào. \
                     Bạn có thể hỏi cụ thể về một trong các chính sách sau: {available}"
                ),
            }
        }
    }
}

const SHIPPING: &str = "CHÍNH SÁCH VẬN CHUYỂN:
- Miễn phí vận chuyển cho đơn hàng từ 500.000đ
- Đơn dưới 500.000đ: phí vận chuyển 30.000đ
- Nội thành giao trong 1-2 ngày, các tỉnh 3-5 ngày làm việc
- Sản phẩm được đóng gói kèm lớp xốp bảo vệ
- Mỗi đơn hàng có mã vận đơn để theo dõi";

const RETURNS: &str = "CHÍNH SÁCH ĐỔI TRẢ:
- Đổi trả miễn phí trong 7 ngày kể từ khi nhận hàng
- Sản phẩm còn nguyên tem mác, chưa qua sử dụng, kèm hóa đơn
- Áp dụng cho hàng lỗi sản xuất, sai mẫu mã hoặc hư hỏng khi vận chuyển
- Lỗi từ cửa hàng: miễn phí; đổi ý từ phía khách: khách chịu phí ship hai chiều";

const PAYMENT: &str = "PHƯƠNG THỨC THANH TOÁN:
- Thanh toán khi nhận hàng (COD)
- Chuyển khoản: Vietcombank, Techcombank, MB Bank
- Ví điện tử: Momo, ZaloPay, VNPay
- Thẻ tín dụng hoặc ghi nợ qua cổng thanh toán";

const WARRANTY: &str = "CHÍNH SÁCH BẢO HÀNH:
- Bảo hành 1-3 tháng tùy loại sản phẩm
- Bảo hành lỗi kết cấu, bạc màu, phai màu và lỗi chất liệu
- Không bảo hành hư hỏng do sử dụng, va đập, nhiệt độ hoặc đã hết hạn bảo hành";

const ORDER: &str = "QUY TRÌNH ĐẶT HÀNG:
1. Chọn sản phẩm và thêm vào giỏ hàng
2. Kiểm tra giỏ hàng và số lượng
3. Điền thông tin giao hàng
4. Chọn phương thức thanh toán
5. Xác nhận đơn hàng
Sau khi đặt, bạn nhận email xác nhận và có thể theo dõi trạng thái đơn hàng.";

const WHOLESALE: &str = "CHÍNH SÁCH BÁN SỈ:
- Tối thiểu 10 sản phẩm mỗi mẫu
- 10-30 sản phẩm giảm 10%, 31-50 sản phẩm giảm 15%, trên 50 sản phẩm giảm 20%
- Hỗ trợ tư vấn chọn mẫu, đóng gói theo yêu cầu và vận chuyển số lượng lớn";

const CUSTOM: &str = "DỊCH VỤ THEO YÊU CẦU:
- Nhận đặt hàng theo mẫu riêng, thực hiện trong 7-15 ngày
- Quy trình: tư vấn và báo giá, gửi bản phác thảo, sản xuất khi khách đồng ý, gửi ảnh trước khi giao
- Đặt cọc 50% giá trị đơn hàng";
